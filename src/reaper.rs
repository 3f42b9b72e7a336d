//! Child-Status Reaper: 非同期 `SIGCHLD` ハンドラと、フォアグラウンドジョブを
//! 待つ同期ウェイタ。どちらも最終的に1つの ingestion ルーチン ([`ingest`]) に
//! 収束する。
//!
//! ハンドラはシグナル非同期安全でなければならない: ジョブテーブルのフィールド
//! 書き換え以外のことをしない。診断メッセージの出力も `String`/`format!` を
//! 使わず、生の `libc::write` で固定のバイト列を直接書き出す。

use std::sync::atomic::{AtomicPtr, Ordering};

use libc::pid_t;

use crate::job::{JobStatus, JobTable, StoppedStack};
use crate::terminal::Terminal;

/// ハンドラとメインフローの双方から参照される可変状態への生ポインタ。
/// `main` が起動時に一度だけ [`install`] で設定する。
struct Shared {
    jobs: *mut JobTable,
    stopped: *mut StoppedStack,
    terminal: *const Terminal,
}

unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

static SHARED: AtomicPtr<Shared> = AtomicPtr::new(std::ptr::null_mut());

/// `SIGCHLD` ハンドラをインストールする。`jobs`/`stopped`/`terminal` は
/// プロセスの寿命いっぱい有効な参照でなければならない（`shell::Shell` が
/// 保持しているものを渡す想定）。
pub fn install(jobs: &mut JobTable, stopped: &mut StoppedStack, terminal: &Terminal) {
    let shared = Box::leak(Box::new(Shared {
        jobs: jobs as *mut JobTable,
        stopped: stopped as *mut StoppedStack,
        terminal: terminal as *const Terminal,
    }));
    SHARED.store(shared, Ordering::SeqCst);
    crate::signal::set_child_handler(sigchld_handler);
}

/// 非同期ハンドラ本体。ノンブロッキングの reap をループし、各 (pid, status) を
/// ingestion ルーチンに渡す。「reap 可能な子がない」ことを示す結果が返ったら抜ける。
extern "C" fn sigchld_handler(_sig: i32) {
    let shared_ptr = SHARED.load(Ordering::SeqCst);
    if shared_ptr.is_null() {
        return;
    }
    let shared = unsafe { &*shared_ptr };
    loop {
        let mut status: i32 = 0;
        let pid = unsafe {
            libc::waitpid(
                -1,
                &mut status,
                libc::WNOHANG | libc::WUNTRACED | libc::WCONTINUED,
            )
        };
        if pid <= 0 {
            break;
        }
        unsafe {
            ingest(&mut *shared.jobs, &mut *shared.stopped, &*shared.terminal, pid, status, true);
        }
    }
}

/// フォアグラウンドジョブが完了または停止するまでブロックする同期ウェイタ。
///
/// 呼び出し側は子プロセス状態シグナルをマスク済みでなければならない。
/// masked 状態でも `waitpid` 自体はブロックできる — マスクされるのはハンドラの
/// *配送*（つまりこのウェイタと競合しうる非同期実行）であって `waitpid` ではない。
pub fn wait_for_job(jobs: &mut JobTable, stopped: &mut StoppedStack, terminal: &Terminal, jid: usize) {
    debug_assert!(crate::signal::is_blocked());
    loop {
        let (is_fg, alive) = match jobs.get(jid) {
            Some(j) => (j.status == JobStatus::Foreground, j.alive_count > 0),
            None => return,
        };
        if !(is_fg && alive) {
            return;
        }

        let mut status: i32 = 0;
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WUNTRACED | libc::WCONTINUED) };

        if pid == -1 {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            if errno == libc::ECHILD {
                crate::shell::fatal("wait_for_job: no child to reap");
            }
            crate::shell::fatal("wait_for_job: waitpid failed");
        }

        ingest(jobs, stopped, terminal, pid, status, false);
    }
}

/// `(pid, status)` を該当ジョブに反映する。ハンドラと同期ウェイタの両方が呼ぶ
/// 共通経路。`from_handler` はハンドラ内からの呼び出しかどうかを示す（端末の
/// 受け渡しは同期ウェイタ経由のときだけ行う、という判定に使う）。
pub fn ingest(
    jobs: &mut JobTable,
    stopped: &mut StoppedStack,
    terminal: &Terminal,
    pid: pid_t,
    status: i32,
    from_handler: bool,
) {
    let job = match jobs.find_mut_by_pid(pid) {
        Some(j) => j,
        None => return,
    };

    if libc::WIFEXITED(status) || libc::WIFSIGNALED(status) {
        job.alive_count = job.alive_count.saturating_sub(1);
        if libc::WIFEXITED(status) {
            job.last_exit_status = libc::WEXITSTATUS(status);
        } else {
            let sig = libc::WTERMSIG(status);
            job.last_exit_status = 128 + sig;
            if let Some(cause) = signal_cause(sig) {
                emit_signal_diagnostic(&job.cmdline, cause);
            }
        }
        return;
    }

    if libc::WIFSTOPPED(status) {
        let sig = libc::WSTOPSIG(status);
        let was_foreground = job.status == JobStatus::Foreground;
        let is_ttou_ttin = sig == libc::SIGTTOU || sig == libc::SIGTTIN;

        job.status = if is_ttou_ttin && !was_foreground {
            JobStatus::NeedsTerminal
        } else {
            JobStatus::Stopped
        };

        if was_foreground {
            if from_handler {
                terminal.save(&mut job.saved_tty);
            } else {
                terminal.give_back_to_shell(&mut job.saved_tty);
            }
        }

        let jid = job.jid;
        if !stopped.contains(jid) {
            stopped.push(jid);
        }
        return;
    }

    // WIFCONTINUED(status): continue は resume ビルトインが状態遷移を担当するため no-op。
}

fn signal_cause(sig: i32) -> Option<&'static [u8]> {
    match sig {
        libc::SIGABRT => Some(b"Aborted"),
        libc::SIGFPE => Some(b"Floating point exception"),
        libc::SIGKILL => Some(b"Killed"),
        libc::SIGSEGV => Some(b"Segmentation fault"),
        libc::SIGTERM => Some(b"Terminated"),
        _ => None,
    }
}

/// 診断メッセージを stderr に出す。`String`/`format!` を使わず、既存のバイト列
/// （`cmdline` と静的な `cause`）をそのまま `write(2)` するため、ハンドラから
/// 呼んでもシグナル非同期安全。
fn emit_signal_diagnostic(cmdline: &str, cause: &[u8]) {
    write_all(libc::STDERR_FILENO, b"jobsh: ");
    write_all(libc::STDERR_FILENO, cmdline.as_bytes());
    write_all(libc::STDERR_FILENO, b": ");
    write_all(libc::STDERR_FILENO, cause);
    write_all(libc::STDERR_FILENO, b"\n");
}

fn write_all(fd: i32, mut buf: &[u8]) {
    while !buf.is_empty() {
        let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if n <= 0 {
            break;
        }
        buf = &buf[n as usize..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_cause_known_and_unknown() {
        assert_eq!(signal_cause(libc::SIGSEGV), Some(&b"Segmentation fault"[..]));
        assert_eq!(signal_cause(libc::SIGTERM), Some(&b"Terminated"[..]));
        assert_eq!(signal_cause(libc::SIGUSR1), None);
    }

    #[test]
    fn ingest_exit_decrements_alive_count_and_leaves_status() {
        crate::signal::block();
        let mut jobs = JobTable::new();
        let mut stopped = StoppedStack::new();
        let terminal = unsafe { std::mem::zeroed::<Terminal>() };
        let jid = jobs.create("true".into(), false).unwrap();
        {
            let job = jobs.get_mut(jid).unwrap();
            job.pgid = 4242;
            job.pids = vec![4242];
            job.alive_count = 1;
        }
        // WIFEXITED(status) with exit code 0 is encoded as status == 0.
        ingest(&mut jobs, &mut stopped, &terminal, 4242, 0, false);
        assert_eq!(jobs.get(jid).unwrap().alive_count, 0);
        crate::signal::unblock();
    }

    #[test]
    fn ingest_unknown_pid_is_noop() {
        crate::signal::block();
        let mut jobs = JobTable::new();
        let mut stopped = StoppedStack::new();
        let terminal = unsafe { std::mem::zeroed::<Terminal>() };
        ingest(&mut jobs, &mut stopped, &terminal, 999999, 0, false);
        assert_eq!(jobs.iter().count(), 0);
        crate::signal::unblock();
    }
}
