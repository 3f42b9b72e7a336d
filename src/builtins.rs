//! ビルトインコマンドの実装。
//!
//! ビルトインはfork/execを経由せずプロセス内で直接実行されるため高速。
//! `try_exec()` が `Some(status)` を返せばビルトインとして処理済み、
//! `None` なら外部コマンドとしてexecutorに委ねる。
//!
//! `jobs`/`kill`/`stop`/`fg`/`bg` はジョブテーブルを直接操作するビルトインで、
//! その本体は常に子プロセス状態シグナルをマスクした区間の内側で実行する。

use std::env;
use std::io::Write;
use std::path::Path;

use crate::job::JobStatus;
use crate::reaper;
use crate::shell::Shell;

/// コマンド名がビルトインかどうかを判定する。
///
/// executor がビルトイン判定 → リダイレクト準備 → 実行、の順で処理するために使用。
pub fn is_builtin(name: &str) -> bool {
    matches!(
        name,
        "exit" | "cd" | "pwd" | "echo" | "export" | "unset" | "jobs" | "kill" | "stop" | "fg"
            | "bg" | "prompt"
    )
}

/// ビルトインコマンドの実行を試みる。
///
/// 出力系ビルトイン (pwd, echo, export, jobs, prompt) はリダイレクト対応のため
/// `stdout` writer に書き込む。
///
/// 戻り値:
/// - `Some(status)` — ビルトインとして実行済み
/// - `None` — 該当するビルトインなし（外部コマンドとして実行すべき）
pub fn try_exec(shell: &mut Shell, args: &[&str], stdout: &mut dyn Write) -> Option<i32> {
    match args[0] {
        "exit" => Some(builtin_exit(shell, args)),
        "cd" => Some(builtin_cd(args)),
        "pwd" => Some(builtin_pwd(stdout)),
        "echo" => Some(builtin_echo(args, stdout)),
        "export" => Some(builtin_export(args, stdout)),
        "unset" => Some(builtin_unset(args)),
        "jobs" => Some(builtin_jobs(shell, args, stdout)),
        "kill" => Some(builtin_kill(shell, args)),
        "stop" => Some(builtin_stop(shell, args)),
        "fg" => Some(builtin_fg(shell, args)),
        "bg" => Some(builtin_bg(shell, args)),
        "prompt" => Some(builtin_prompt(shell, args, stdout)),
        _ => None,
    }
}

/// `exit` — シェルを終了する。引数は取らない。直前のステータスで終了する。
fn builtin_exit(shell: &mut Shell, args: &[&str]) -> i32 {
    if args.len() != 1 {
        eprintln!("jobsh: exit: too many arguments");
        return shell.last_status;
    }
    shell.should_exit = true;
    shell.last_status
}

/// `cd [dir]` — カレントディレクトリを変更する。引数省略時は `$HOME` に移動。
fn builtin_cd(args: &[&str]) -> i32 {
    let target = if args.len() > 1 {
        args[1].to_string()
    } else {
        match env::var("HOME") {
            Ok(home) => home,
            Err(_) => {
                eprintln!("jobsh: cd: HOME not set");
                return 1;
            }
        }
    };

    if let Err(e) = env::set_current_dir(Path::new(&target)) {
        eprintln!("jobsh: cd: {}: {}", target, e);
        1
    } else {
        0
    }
}

/// `pwd` — カレントディレクトリを出力する。
fn builtin_pwd(stdout: &mut dyn Write) -> i32 {
    match env::current_dir() {
        Ok(path) => {
            let _ = writeln!(stdout, "{}", path.display());
            0
        }
        Err(e) => {
            eprintln!("jobsh: pwd: {}", e);
            1
        }
    }
}

/// `echo [-n] args...` — 引数をスペース区切りで出力する。`-n` で改行抑制。
fn builtin_echo(args: &[&str], stdout: &mut dyn Write) -> i32 {
    let (no_newline, words) = if args.len() > 1 && args[1] == "-n" {
        (true, &args[2..])
    } else {
        (false, &args[1..])
    };

    for (i, word) in words.iter().enumerate() {
        if i > 0 {
            let _ = write!(stdout, " ");
        }
        let _ = write!(stdout, "{}", word);
    }

    if !no_newline {
        let _ = writeln!(stdout);
    }

    0
}

/// `export [VAR=val...]` — 環境変数を設定する。引数なしなら全変数をソート済みで一覧表示。
fn builtin_export(args: &[&str], stdout: &mut dyn Write) -> i32 {
    if args.len() <= 1 {
        // 全変数を一覧表示（ソート済み）
        let mut vars: Vec<(String, String)> = env::vars().collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, value) in &vars {
            let _ = writeln!(stdout, "declare -x {}=\"{}\"", key, value);
        }
        return 0;
    }

    for arg in &args[1..] {
        if let Some(eq_pos) = arg.find('=') {
            let key = &arg[..eq_pos];
            let value = &arg[eq_pos + 1..];
            env::set_var(key, value);
        } else {
            // 引数に `=` がない場合は無視（bash互換: export VAR は既存変数をexportする）
        }
    }

    0
}

/// `unset VAR...` — 環境変数を削除する。
fn builtin_unset(args: &[&str]) -> i32 {
    for arg in &args[1..] {
        env::remove_var(arg);
    }
    0
}

/// `jobs` — 全ジョブを挿入順に一覧表示する。
fn builtin_jobs(shell: &mut Shell, args: &[&str], stdout: &mut dyn Write) -> i32 {
    if args.len() != 1 {
        eprintln!("jobsh: jobs: too many arguments");
        return 1;
    }
    crate::signal::masked(|| {
        for job in shell.jobs.iter() {
            let _ = writeln!(stdout, "{}", job.status_line());
        }
    });
    0
}

fn parse_jid(s: &str) -> Option<usize> {
    s.parse::<usize>().ok()
}

/// `kill JID` — ジョブのプロセスグループに終了シグナルを送る。
fn builtin_kill(shell: &mut Shell, args: &[&str]) -> i32 {
    if args.len() != 2 {
        eprintln!("jobsh: kill: usage: kill <jid>");
        return 1;
    }
    let jid = match parse_jid(args[1]) {
        Some(j) => j,
        None => {
            eprintln!("jobsh: kill: {}: invalid job id", args[1]);
            return 1;
        }
    };
    crate::signal::masked(|| {
        let pgid = match shell.jobs.get(jid) {
            Some(j) => j.pgid,
            None => {
                eprintln!("jobsh: kill: {}: no such job", jid);
                return 1;
            }
        };
        if unsafe { libc::kill(-pgid, libc::SIGTERM) } < 0 {
            eprintln!("jobsh: kill: {}: {}", jid, std::io::Error::last_os_error());
            return 1;
        }
        0
    })
}

/// `stop JID` — ジョブのプロセスグループに停止シグナルを送り、成功時は
/// ステータスを Stopped にして回線規約をスナップショットする。
fn builtin_stop(shell: &mut Shell, args: &[&str]) -> i32 {
    if args.len() != 2 {
        eprintln!("jobsh: stop: usage: stop <jid>");
        return 1;
    }
    let jid = match parse_jid(args[1]) {
        Some(j) => j,
        None => {
            eprintln!("jobsh: stop: {}: invalid job id", args[1]);
            return 1;
        }
    };
    crate::signal::masked(|| {
        let pgid = match shell.jobs.get(jid) {
            Some(j) => j.pgid,
            None => {
                eprintln!("jobsh: stop: {}: no such job", jid);
                return 1;
            }
        };
        if unsafe { libc::kill(-pgid, libc::SIGTSTP) } < 0 {
            eprintln!("jobsh: stop: {}: {}", jid, std::io::Error::last_os_error());
            return 1;
        }
        {
            let job = shell.jobs.get_mut(jid).unwrap();
            job.status = JobStatus::Stopped;
            shell.terminal.save(&mut job.saved_tty);
        }
        if !shell.stopped.contains(jid) {
            shell.stopped.push(jid);
        }
        0
    })
}

/// `fg`/`bg` の対象ジョブを解決する。明示的な jid 引数があればそれを、
/// なければ Stopped-Job スタックの最後の要素を使う。
fn resolve_target(shell: &Shell, args: &[&str]) -> Result<usize, String> {
    if args.len() > 2 {
        return Err(format!("usage: {} [jid]", args[0]));
    }
    if args.len() == 2 {
        let jid = parse_jid(args[1]).ok_or_else(|| format!("{}: invalid job id", args[1]))?;
        if shell.jobs.get(jid).is_none() {
            return Err(format!("{}: no such job", jid));
        }
        Ok(jid)
    } else {
        shell
            .stopped
            .peek_last()
            .ok_or_else(|| "there are currently no stopped jobs".to_string())
    }
}

/// `fg [JID]` — 対象ジョブ（Stopped または NeedsTerminal）に端末を渡し、
/// 継続シグナルを送って Foreground に遷移させ、完了または再停止まで待つ。
fn builtin_fg(shell: &mut Shell, args: &[&str]) -> i32 {
    let jid = match resolve_target(shell, args) {
        Ok(j) => j,
        Err(msg) => {
            eprintln!("jobsh: fg: {}", msg);
            return 1;
        }
    };

    crate::signal::block();
    let status = match shell.jobs.get(jid) {
        Some(j) => j.status,
        None => {
            crate::signal::unblock();
            return 1;
        }
    };
    if !matches!(status, JobStatus::Stopped | JobStatus::NeedsTerminal) {
        crate::signal::unblock();
        eprintln!("jobsh: fg: {}: job is already running", jid);
        return 1;
    }

    shell.stopped.remove(jid);
    let (pgid, saved) = {
        let job = shell.jobs.get_mut(jid).unwrap();
        job.status = JobStatus::Foreground;
        (job.pgid, job.saved_tty)
    };
    shell.terminal.give_to(pgid, saved.as_ref());
    unsafe {
        libc::kill(-pgid, libc::SIGCONT);
    }

    reaper::wait_for_job(&mut shell.jobs, &mut shell.stopped, &shell.terminal, jid);

    let (still_foreground, exit_status, alive) = match shell.jobs.get(jid) {
        Some(j) => (j.status == JobStatus::Foreground, j.last_exit_status, j.alive_count),
        None => (false, 0, 0),
    };
    if alive == 0 {
        shell.jobs.reclaim(jid);
    }
    // 再停止して戻ってきた場合、同期ウェイタが既に端末をシェルへ戻し saved_tty を
    // 捕捉済みなのでここでは何もしない（重ねて戻すとスナップショットが壊れる）。
    if still_foreground {
        let mut discard = None;
        shell.terminal.give_back_to_shell(&mut discard);
    }

    crate::signal::unblock();

    if alive == 0 {
        exit_status
    } else {
        128 + libc::SIGTSTP
    }
}

/// `bg [JID]` — 対象ジョブに継続シグナルを送って Background へ遷移させる。
/// 端末の受け渡しは発生しない。
fn builtin_bg(shell: &mut Shell, args: &[&str]) -> i32 {
    let jid = match resolve_target(shell, args) {
        Ok(j) => j,
        Err(msg) => {
            eprintln!("jobsh: bg: {}", msg);
            return 1;
        }
    };

    crate::signal::masked(|| {
        let status = match shell.jobs.get(jid) {
            Some(j) => j.status,
            None => return 1,
        };
        if !matches!(status, JobStatus::Stopped | JobStatus::NeedsTerminal) {
            eprintln!("jobsh: bg: {}: job is already running", jid);
            return 1;
        }
        shell.stopped.remove(jid);
        let pgid = shell.jobs.get(jid).unwrap().pgid;
        unsafe {
            libc::kill(-pgid, libc::SIGCONT);
        }
        if let Some(job) = shell.jobs.get_mut(jid) {
            job.status = JobStatus::Background;
        }
        0
    })
}

/// `prompt [TEMPLATE]` — プロンプトテンプレートを読み取る、または設定する。
fn builtin_prompt(shell: &mut Shell, args: &[&str], stdout: &mut dyn Write) -> i32 {
    match args.len() {
        1 => {
            let _ = writeln!(stdout, "{}", shell.prompt_template);
            0
        }
        2 => {
            shell.prompt_template = args[1].to_string();
            0
        }
        _ => {
            eprintln!("jobsh: prompt: usage: prompt [template]");
            1
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::Shell;

    #[test]
    fn pwd_outputs_current_dir() {
        let mut buf = Vec::new();
        let status = builtin_pwd(&mut buf);
        assert_eq!(status, 0);
        let output = String::from_utf8(buf).unwrap();
        assert!(output.ends_with('\n'));
        assert!(!output.trim().is_empty());
    }

    #[test]
    fn echo_basic() {
        let mut buf = Vec::new();
        builtin_echo(&["echo", "hello", "world"], &mut buf);
        assert_eq!(String::from_utf8(buf).unwrap(), "hello world\n");
    }

    #[test]
    fn echo_no_args() {
        let mut buf = Vec::new();
        builtin_echo(&["echo"], &mut buf);
        assert_eq!(String::from_utf8(buf).unwrap(), "\n");
    }

    #[test]
    fn echo_dash_n() {
        let mut buf = Vec::new();
        builtin_echo(&["echo", "-n", "hello"], &mut buf);
        assert_eq!(String::from_utf8(buf).unwrap(), "hello");
    }

    #[test]
    fn echo_dash_n_no_args() {
        let mut buf = Vec::new();
        builtin_echo(&["echo", "-n"], &mut buf);
        assert_eq!(String::from_utf8(buf).unwrap(), "");
    }

    #[test]
    fn export_set_and_get() {
        let mut buf = Vec::new();
        builtin_export(&["export", "JOBSH_TEST_EXPORT=hello123"], &mut buf);
        assert_eq!(env::var("JOBSH_TEST_EXPORT").unwrap(), "hello123");
        env::remove_var("JOBSH_TEST_EXPORT");
    }

    #[test]
    fn export_value_with_equals() {
        let mut buf = Vec::new();
        builtin_export(&["export", "JOBSH_TEST_EQ=A=B=C"], &mut buf);
        assert_eq!(env::var("JOBSH_TEST_EQ").unwrap(), "A=B=C");
        env::remove_var("JOBSH_TEST_EQ");
    }

    #[test]
    fn export_list_sorted() {
        env::set_var("JOBSH_TEST_Z", "z");
        env::set_var("JOBSH_TEST_A", "a");
        let mut buf = Vec::new();
        builtin_export(&["export"], &mut buf);
        let output = String::from_utf8(buf).unwrap();
        let a_pos = output.find("JOBSH_TEST_A").unwrap();
        let z_pos = output.find("JOBSH_TEST_Z").unwrap();
        assert!(a_pos < z_pos, "export listing should be sorted");
        env::remove_var("JOBSH_TEST_Z");
        env::remove_var("JOBSH_TEST_A");
    }

    #[test]
    fn unset_removes_var() {
        env::set_var("JOBSH_TEST_UNSET", "value");
        builtin_unset(&["unset", "JOBSH_TEST_UNSET"]);
        assert!(env::var("JOBSH_TEST_UNSET").is_err());
    }

    #[test]
    fn is_builtin_check() {
        for name in ["exit", "cd", "pwd", "echo", "export", "unset", "jobs", "kill", "stop", "fg", "bg", "prompt"] {
            assert!(is_builtin(name), "{name} should be a builtin");
        }
        assert!(!is_builtin("ls"));
        assert!(!is_builtin("grep"));
    }

    #[test]
    fn try_exec_returns_none_for_external() {
        let mut shell = Shell::new();
        let mut buf = Vec::new();
        assert!(try_exec(&mut shell, &["ls"], &mut buf).is_none());
    }

    #[test]
    fn try_exec_echo() {
        let mut shell = Shell::new();
        let mut buf = Vec::new();
        let status = try_exec(&mut shell, &["echo", "test"], &mut buf).unwrap();
        assert_eq!(status, 0);
        assert_eq!(String::from_utf8(buf).unwrap(), "test\n");
    }

    #[test]
    fn fg_with_no_stopped_jobs_errors() {
        let mut shell = Shell::new();
        let status = builtin_fg(&mut shell, &["fg"]);
        assert_eq!(status, 1);
    }

    #[test]
    fn bg_with_no_stopped_jobs_errors() {
        let mut shell = Shell::new();
        let status = builtin_bg(&mut shell, &["bg"]);
        assert_eq!(status, 1);
    }

    #[test]
    fn kill_unknown_jid_errors() {
        let mut shell = Shell::new();
        let status = builtin_kill(&mut shell, &["kill", "999"]);
        assert_eq!(status, 1);
    }

    #[test]
    fn jobs_on_empty_table_prints_nothing() {
        let mut shell = Shell::new();
        let mut buf = Vec::new();
        let status = builtin_jobs(&mut shell, &["jobs"], &mut buf);
        assert_eq!(status, 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn prompt_get_and_set() {
        let mut shell = Shell::new();
        let mut buf = Vec::new();
        builtin_prompt(&mut shell, &["prompt", "> "], &mut buf);
        assert_eq!(shell.prompt_template, "> ");
        buf.clear();
        builtin_prompt(&mut shell, &["prompt"], &mut buf);
        assert_eq!(String::from_utf8(buf).unwrap(), "> \n");
    }
}
