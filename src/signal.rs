//! Signal Gate: 子プロセス状態シグナル（SIGCHLD）のハンドラ登録と、
//! ジョブテーブルへのアクセスを律するマスク/アンマスク。
//!
//! ジョブテーブルは single-writer: メインフローの外側（= ハンドラの中）から
//! 触る場合と、メインフローから触る場合の両方で、子プロセス状態シグナルをマスクした
//! 区間の内側にいることを要求する。再入可能にするため、マスクは深さカウンタで管理する
//! （`block()`/`unblock()` がネストしても、最外周の `unblock()` でのみ実際に解除される）。

use std::sync::atomic::{AtomicU32, Ordering};

static MASK_DEPTH: AtomicU32 = AtomicU32::new(0);

/// `h` を SIGCHLD の非同期ハンドラとしてインストールする。
///
/// `SA_RESTART`（再起動可能なシステムコールは再開する）と `SA_NOCLDSTOP` を立てない
/// （停止イベントもハンドラに配送させる）。
pub fn set_child_handler(h: extern "C" fn(i32)) {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = h as usize;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = libc::SA_RESTART;
        libc::sigaction(libc::SIGCHLD, &action, std::ptr::null_mut());
    }
}

/// 子プロセス状態シグナルの配送をブロックする。再入可能（深さカウンタ）。
///
/// 最外周の呼び出しでのみ実際に `sigprocmask(SIG_BLOCK, ...)` を行う。
pub fn block() {
    if MASK_DEPTH.fetch_add(1, Ordering::SeqCst) == 0 {
        unsafe {
            let mut set: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut set);
            libc::sigaddset(&mut set, libc::SIGCHLD);
            libc::sigprocmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
        }
    }
}

/// `block()` と対になる解除。深さカウンタが 0 に戻ったときのみ実際に配送を再開する。
pub fn unblock() {
    let prev = MASK_DEPTH.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| {
        if d == 0 {
            None
        } else {
            Some(d - 1)
        }
    });
    if prev == Ok(1) {
        unsafe {
            let mut set: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut set);
            libc::sigaddset(&mut set, libc::SIGCHLD);
            libc::sigprocmask(libc::SIG_UNBLOCK, &set, std::ptr::null_mut());
        }
    }
}

/// 現在、子プロセス状態シグナルがマスクされているか。ジョブテーブルを読み書きする
/// コードパスの入口で assert するために使う。
pub fn is_blocked() -> bool {
    MASK_DEPTH.load(Ordering::SeqCst) > 0
}

/// マスク区間の内側でクロージャを実行する RAII ガード相当のヘルパー。
/// `block()` / `unblock()` を対称に呼ぶのを保証する。
pub fn masked<T>(f: impl FnOnce() -> T) -> T {
    block();
    let result = f();
    unblock();
    result
}
