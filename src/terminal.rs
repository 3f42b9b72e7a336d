//! ターミナル制御（回線規約のスナップショット保存・復元、フォアグラウンドプロセスグループの委譲）。
//!
//! シェル自身のプロセスグループ確立、ジョブへの端末委譲、シェルへの回収を担う。
//! ここでの操作は、呼び出し側が Signal Gate で子プロセス状態シグナルを
//! マスクした区間の内側から呼ぶことを前提とする（端末委譲はマスク区間と不可分）。

use libc::{pid_t, termios};

/// 回線規約（termios）の1スナップショット。ジョブがフォアグラウンドを保持したことが
/// あり、かつ現在保持していない場合にのみ有効な値を持つ。
#[derive(Clone, Copy)]
pub struct TtyState(termios);

/// 制御端末とシェル自身のプロセスグループを表す。
pub struct Terminal {
    fd: i32,
    shell_pgid: pid_t,
    shell_tty: TtyState,
}

impl Terminal {
    /// シェル起動時に一度だけ呼ぶ。シェルを自分自身のプロセスグループに所属させ、
    /// 制御端末のフォアグラウンドプロセスグループをシェルに設定したうえで、
    /// シェル自身の回線規約スナップショットを取得する。
    pub fn init(fd: i32) -> Self {
        unsafe {
            let pid = libc::getpid();
            if libc::getpgrp() != pid {
                libc::setpgid(0, 0);
            }
            let shell_pgid = libc::getpgrp();
            libc::tcsetpgrp(fd, shell_pgid);
            let shell_tty = Self::capture(fd);
            Self {
                fd,
                shell_pgid,
                shell_tty,
            }
        }
    }

    fn capture(fd: i32) -> TtyState {
        unsafe {
            let mut raw: termios = std::mem::zeroed();
            libc::tcgetattr(fd, &mut raw);
            TtyState(raw)
        }
    }

    /// 制御端末の fd。
    pub fn fd(&self) -> i32 {
        self.fd
    }

    /// シェル自身のプロセスグループ ID。
    pub fn shell_pgid(&self) -> pid_t {
        self.shell_pgid
    }

    /// 現在の回線規約状態を `dst` へコピーする。
    pub fn save(&self, dst: &mut Option<TtyState>) {
        *dst = Some(Self::capture(self.fd));
    }

    /// `tty_snapshot` があれば復元してから、端末の所有権を `pgid` に委譲する。
    pub fn give_to(&self, pgid: pid_t, tty_snapshot: Option<&TtyState>) {
        unsafe {
            if let Some(state) = tty_snapshot {
                libc::tcsetattr(self.fd, libc::TCSADRAIN, &state.0);
            }
            libc::tcsetpgrp(self.fd, pgid);
        }
    }

    /// フォアグラウンドジョブから端末を取り戻す。現在の端末状態を `job_saved_tty`
    /// （保留中のフォアグラウンドジョブの `saved_tty`）に記録してから、シェル自身の
    /// 回線規約を復元し、所有権を回収する。
    pub fn give_back_to_shell(&self, job_saved_tty: &mut Option<TtyState>) {
        *job_saved_tty = Some(Self::capture(self.fd));
        unsafe {
            libc::tcsetattr(self.fd, libc::TCSADRAIN, &self.shell_tty.0);
            libc::tcsetpgrp(self.fd, self.shell_pgid);
        }
    }
}
