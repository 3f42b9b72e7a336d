//! Pipeline Launcher: パース済みパイプラインからパイプ・子プロセス・ジョブを
//! 組み立て、フォアグラウンド/バックグラウンドの端末所有権プロトコルを実行する。

use std::io::Write;
use std::os::unix::io::IntoRawFd;

use crate::job::{JobStatus, JobTable, StoppedStack};
use crate::parser::{Pipeline, RedirectKind};
use crate::reaper;
use crate::spawn;
use crate::terminal::Terminal;

/// パイプラインを起動する。戻り値はフォアグラウンド実行時の終了ステータス
/// （停止時は 128 + SIGTSTP）。バックグラウンド起動が正常に完了した場合は 0。
pub fn launch(
    jobs: &mut JobTable,
    stopped: &mut StoppedStack,
    terminal: &Terminal,
    pipeline: &Pipeline,
    cmdline: &str,
) -> i32 {
    crate::signal::block();
    let status = launch_masked(jobs, stopped, terminal, pipeline, cmdline);
    crate::signal::unblock();
    status
}

fn launch_masked(
    jobs: &mut JobTable,
    stopped: &mut StoppedStack,
    terminal: &Terminal,
    pipeline: &Pipeline,
    cmdline: &str,
) -> i32 {
    let jid = match jobs.create(cmdline.trim_end_matches('&').trim().to_string(), pipeline.background) {
        Some(j) => j,
        None => crate::shell::fatal("job table capacity exhausted"),
    };

    let n = pipeline.commands.len();

    // N-1 本の無名パイプ。pipe[i] はコマンド i の stdout をコマンド i+1 の stdin に
    // 繋ぐ。全 pipe fd はどの子にも継承されない分は最後に閉じる。
    let mut pipes: Vec<(i32, i32)> = Vec::with_capacity(n.saturating_sub(1));
    for _ in 0..n.saturating_sub(1) {
        let mut fds = [0i32; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            crate::shell::fatal("pipe() failed");
        }
        pipes.push((fds[0], fds[1]));
    }
    let all_pipe_fds: Vec<i32> = pipes.iter().flat_map(|&(r, w)| [r, w]).collect();

    let mut redir_fds_to_close: Vec<i32> = Vec::new();
    let mut pgid: libc::pid_t = 0;

    for (i, command) in pipeline.commands.iter().enumerate() {
        let args: Vec<&str> = command.args.iter().map(|a| a.as_ref()).collect();
        if args.is_empty() {
            continue;
        }

        let mut stdin_fd = if i > 0 {
            Some(pipes[i - 1].0)
        } else {
            None
        };
        let mut stdout_fd = if i < n.saturating_sub(1) {
            Some(pipes[i].1)
        } else {
            None
        };
        let mut stderr_fd: Option<i32> = None;
        let mut extra_dup2s: Vec<(i32, i32)> = Vec::new();

        for redirect in &command.redirects {
            match &redirect.kind {
                RedirectKind::Input => {
                    if let Some(fd) = open_redirect_file(&redirect.target, false, false) {
                        stdin_fd = Some(fd);
                        redir_fds_to_close.push(fd);
                    }
                }
                RedirectKind::Output => {
                    if let Some(fd) = open_redirect_file(&redirect.target, true, false) {
                        stdout_fd = Some(fd);
                        redir_fds_to_close.push(fd);
                    }
                }
                RedirectKind::Append => {
                    if let Some(fd) = open_redirect_file(&redirect.target, true, true) {
                        stdout_fd = Some(fd);
                        redir_fds_to_close.push(fd);
                    }
                }
                RedirectKind::Stderr => {
                    if let Some(fd) = open_redirect_file(&redirect.target, true, false) {
                        stderr_fd = Some(fd);
                        redir_fds_to_close.push(fd);
                    }
                }
                RedirectKind::FdDup { src_fd, dst_fd } => {
                    extra_dup2s.push((*src_fd, *dst_fd));
                }
            }
        }

        let mut fds_to_close = all_pipe_fds.clone();
        fds_to_close.extend(redir_fds_to_close.iter().copied());

        match spawn::spawn(
            &args,
            pgid,
            stdin_fd,
            stdout_fd,
            stderr_fd,
            &fds_to_close,
            &extra_dup2s,
        ) {
            Ok(pid) => {
                if pgid == 0 {
                    pgid = pid;
                }
                if let Some(job) = jobs.get_mut(jid) {
                    job.pgid = pgid;
                    job.pids.push(pid);
                    job.alive_count += 1;
                }
            }
            Err(e) => {
                eprintln!("{}", e);
                if let Some(job) = jobs.get_mut(jid) {
                    job.last_exit_status = e.exit_status();
                }
            }
        }
    }

    // 親はパイプ・リダイレクト fd を全て閉じる。子は exec 前に dup2 済みでそれぞれ
    // 必要な複製を持っている。
    for fd in all_pipe_fds.iter().chain(redir_fds_to_close.iter()) {
        unsafe {
            libc::close(*fd);
        }
    }

    let alive = jobs.get(jid).map_or(0, |j| j.alive_count);
    if alive == 0 {
        // 全コマンドが spawn に失敗した。ジョブを即座に回収して終了コードを返す。
        let code = jobs.get(jid).map_or(1, |j| j.last_exit_status);
        jobs.reclaim(jid);
        return if code == 0 { 127 } else { code };
    }

    if pipeline.background {
        if let Some(job) = jobs.get(jid) {
            println!("[{}] {}", job.jid, job.pgid);
            let _ = std::io::stdout().flush();
        }
        return 0;
    }

    // フォアグラウンド: 現在の（=シェル自身の）回線規約をジョブのスナップショット
    // として記録してから、端末をこのジョブの pgid に委譲する。
    if let Some(job) = jobs.get_mut(jid) {
        terminal.save(&mut job.saved_tty);
        let saved = job.saved_tty;
        terminal.give_to(job.pgid, saved.as_ref());
    }

    reaper::wait_for_job(jobs, stopped, terminal, jid);

    let (still_foreground, exit_status) = match jobs.get(jid) {
        Some(job) => (job.status == JobStatus::Foreground, job.last_exit_status),
        None => (false, 0),
    };

    let alive = jobs.get(jid).map_or(0, |j| j.alive_count);
    if alive == 0 {
        jobs.reclaim(jid);
    }

    // ジョブがまだ Foreground のまま戻ってきたのは完走したケースのみ。停止時は
    // 同期ウェイタの中で既に端末をシェルへ戻している（ここで重ねて戻すと、停止時
    // に捕捉した saved_tty を壊してしまう）。
    if still_foreground {
        let mut discard = None;
        terminal.give_back_to_shell(&mut discard);
    }

    if alive == 0 {
        exit_status
    } else {
        // 停止した（フォアグラウンドからの ^Z 等）。148 = 128 + SIGTSTP。
        128 + libc::SIGTSTP
    }
}

fn open_redirect_file(path: &str, for_write: bool, append: bool) -> Option<i32> {
    use std::fs::OpenOptions;
    use std::os::unix::fs::OpenOptionsExt;

    let mut opts = OpenOptions::new();
    if for_write {
        opts.write(true).create(true);
        if append {
            opts.append(true);
        } else {
            opts.truncate(true);
        }
        opts.mode(0o750);
    } else {
        opts.read(true);
    }

    match opts.open(path) {
        Ok(file) => Some(file.into_raw_fd()),
        Err(e) => {
            eprintln!("jobsh: {}: {}", path, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_redirect_missing_input_reports_error_and_returns_none() {
        let fd = open_redirect_file("/nonexistent/path/for/jobsh/tests", false, false);
        assert!(fd.is_none());
    }
}
