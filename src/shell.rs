//! シェルのグローバル状態を保持するモジュール。
//!
//! ジョブテーブル・Stopped-Job スタック・端末コントローラ・プロンプト状態を
//! 束ねる。REPL ループ全体で共有される唯一のインスタンス。

use crate::job::{JobTable, StoppedStack};
use crate::prompt;
use crate::terminal::Terminal;

/// シェルの実行状態。
pub struct Shell {
    /// 直前のコマンドの終了ステータス。プロンプト表示や `$?` 展開に使う。
    pub last_status: i32,
    /// `exit` ビルトインで true にセットされ、REPLループを終了させる。
    pub should_exit: bool,
    pub jobs: JobTable,
    pub stopped: StoppedStack,
    pub terminal: Terminal,
    /// `prompt` ビルトインで読み書きされるテンプレート文字列。
    pub prompt_template: String,
    /// `\!` エスケープに使われるプロンプト描画回数カウンタ。
    prompt_counter: u64,
}

impl Shell {
    pub fn new() -> Self {
        Self {
            last_status: 0,
            should_exit: false,
            jobs: JobTable::new(),
            stopped: StoppedStack::new(),
            terminal: Terminal::init(libc::STDIN_FILENO),
            prompt_template: prompt::DEFAULT_TEMPLATE.to_string(),
            prompt_counter: 0,
        }
    }

    /// プロンプトテンプレートを展開し、描画回数カウンタを1つ進める。
    pub fn render_prompt(&mut self) -> String {
        self.prompt_counter += 1;
        prompt::expand(&self.prompt_template, self.prompt_counter)
    }
}

/// 回復不能な内部エラー。診断を標準エラーに出してプロセスを直ちに終了する
/// （reap が "no child" を返す、ジョブテーブル容量超過など — invariant violation）。
pub fn fatal(msg: &str) -> ! {
    eprintln!("jobsh: fatal: {}", msg);
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_shell_has_clean_state() {
        let shell = Shell::new();
        assert_eq!(shell.last_status, 0);
        assert!(!shell.should_exit);
        assert_eq!(shell.jobs.iter().count(), 0);
    }

    #[test]
    fn render_prompt_increments_counter() {
        let mut shell = Shell::new();
        shell.prompt_template = "[\\!]".to_string();
        assert_eq!(shell.render_prompt(), "[1]");
        assert_eq!(shell.render_prompt(), "[2]");
    }
}
