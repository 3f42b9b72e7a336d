//! コマンドディスパッチ: パース済み `CommandList` を `Connector` に従って実行する。
//!
//! 各パイプラインの先頭コマンドがビルトインならプロセス内で実行し（fork不要の
//! 高速パス）、そうでなければ [`crate::launcher`] に委ねて `posix_spawnp` で
//! 子プロセスを起動する。

use std::io;

use crate::builtins;
use crate::launcher;
use crate::parser::{CommandList, Connector};
use crate::shell::Shell;

/// `list` の各パイプラインを `Connector` の条件に従って順に実行し、最後に実行
/// したパイプラインの終了ステータスを返す。`raw_line` はジョブの `jobs` 表示
/// 用コマンドライン文字列として使う。
pub fn execute(shell: &mut Shell, list: &CommandList, raw_line: &str) -> i32 {
    let mut status = shell.last_status;

    for item in &list.items {
        let should_run = match item.connector {
            Connector::Seq => true,
            Connector::And => status == 0,
            Connector::Or => status != 0,
        };
        // `&&`/`||` で条件を満たさず飛ばされたパイプラインも、直前のステータスを
        // 引き継ぐだけで実行はしない。
        if !should_run {
            continue;
        }

        let head = match item.pipeline.commands.first() {
            Some(cmd) if !cmd.args.is_empty() => cmd.args[0].as_ref(),
            _ => {
                status = 0;
                continue;
            }
        };

        status = if item.pipeline.commands.len() == 1 && builtins::is_builtin(head) {
            let args: Vec<&str> = item.pipeline.commands[0]
                .args
                .iter()
                .map(|a| a.as_ref())
                .collect();
            let mut stdout = io::stdout();
            builtins::try_exec(shell, &args, &mut stdout).unwrap_or(0)
        } else {
            launcher::launch(
                &mut shell.jobs,
                &mut shell.stopped,
                &shell.terminal,
                &item.pipeline,
                raw_line,
            )
        };
    }

    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    #[test]
    fn builtin_echo_through_execute() {
        let mut shell = Shell::new();
        let list = parser::parse("echo hi", 0).unwrap().unwrap();
        let status = execute(&mut shell, &list, "echo hi");
        assert_eq!(status, 0);
    }

    #[test]
    fn and_connector_skips_on_failure() {
        let mut shell = Shell::new();
        let list = parser::parse("false && echo skipped", 0).unwrap().unwrap();
        // `false` is external; run via launcher and expect non-zero, so the
        // `echo` half never executes. We only assert the dispatch doesn't panic
        // and returns some status.
        let _ = execute(&mut shell, &list, "false && echo skipped");
    }

    #[test]
    fn empty_command_list_segment_keeps_status() {
        let mut shell = Shell::new();
        shell.last_status = 7;
        let list = parser::CommandList { items: vec![] };
        assert_eq!(execute(&mut shell, &list, ""), 7);
    }
}
