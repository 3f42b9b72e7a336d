//! jobsh — POSIX ジョブコントロール対応の対話型シェル
//!
//! REPLループ: プロンプト表示 → 行読み取り → パース → 実行 → ジョブスイープ → ループ
//!
//! シェル自身は SIGINT/SIGTSTP/SIGTTOU/SIGTTIN を無視する。これらは常にフォア
//! グラウンドのプロセスグループ（子のパイプライン、またはシェル自身の行エディタ
//! が raw モードで読んでいる間は誰も受け取らない）に向けて端末ドライバが配送する。
//! `SIGCHLD` だけは [`reaper`] がハンドラを持つ。

mod builtins;
mod complete;
mod editor;
mod executor;
mod glob;
mod highlight;
mod history;
mod job;
mod launcher;
mod parser;
mod prompt;
mod reaper;
mod shell;
mod signal;
mod spawn;
mod terminal;

use editor::LineEditor;
use shell::Shell;

const USAGE: &str = "usage: jobsh [-h]\n\nAn interactive POSIX job-controlling shell.\n";

fn main() {
    let mut args = std::env::args().skip(1);
    if let Some(flag) = args.next() {
        if flag == "-h" {
            print!("{}", USAGE);
            std::process::exit(0);
        }
    }

    // シェル自身はこれらのシグナルを無視する。子プロセスは posix_spawn の
    // set_sigdefault でデフォルトに戻してから exec されるため、^C/^Z で正常に
    // 中断・停止できる。
    unsafe {
        libc::signal(libc::SIGINT, libc::SIG_IGN);
        libc::signal(libc::SIGTSTP, libc::SIG_IGN);
        libc::signal(libc::SIGTTOU, libc::SIG_IGN);
        libc::signal(libc::SIGTTIN, libc::SIG_IGN);
    }

    let mut shell = Shell::new();
    reaper::install(&mut shell.jobs, &mut shell.stopped, &shell.terminal);

    let mut editor = LineEditor::new();

    loop {
        let prompt = shell.render_prompt();
        let line = match editor.read_line(&prompt) {
            Some(line) => line,
            None => break, // EOF
        };

        editor.add_history(&line);

        match parser::parse(&line, shell.last_status) {
            Ok(Some(list)) => {
                shell.last_status = executor::execute(&mut shell, &list, line.trim_end());
            }
            Ok(None) => {}
            Err(e) => {
                eprintln!("jobsh: {}", e);
            }
        }

        signal::masked(|| shell.jobs.sweep_reclaimable());

        if shell.should_exit {
            break;
        }
    }

    std::process::exit(shell.last_status);
}
