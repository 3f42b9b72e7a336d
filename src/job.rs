//! ジョブテーブルと Stopped-Job スタック。
//!
//! ジョブテーブルは single-writer: 変更は常に [`crate::signal`] で子プロセス状態
//! シグナルをマスクした区間の内側（または非同期ハンドラ自身の中）から行う。
//! 固定容量の配列 ([`JobTable`] 内部は `Vec<Option<Job>>`、長さ固定) にすることで、
//! 非同期ハンドラ内でのフィールド書き換えが絶対にアロケータを呼ばないようにしてある。

use libc::pid_t;

use crate::terminal::TtyState;

/// jid の取りうる最大値 + 1。jid 0 は未使用のセンチネル。
pub const MAX_JOBS: usize = 1 << 16;

/// ジョブの集約状態。
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum JobStatus {
    /// 制御端末のフォアグラウンドプロセスグループを保持している。
    Foreground,
    /// バックグラウンドで実行中。
    Background,
    /// SIGTSTP 等で停止中（以前フォアグラウンドだった場合も含む）。
    Stopped,
    /// バックグラウンドのまま端末 I/O を試みて停止した（SIGTTIN/SIGTTOU）。
    /// 再開するにはまず端末を委譲する必要がある。
    NeedsTerminal,
}

/// 1つのパイプライン実行を表すジョブ。
pub struct Job {
    pub jid: usize,
    /// パイプライン内の全プロセスが共有するプロセスグループ ID。
    /// 電選前（最初の子がまだ fork されていない）は 0。
    pub pgid: pid_t,
    /// `jobs` 表示用のコマンドライン文字列。
    pub cmdline: String,
    /// パイプラインを構成する各プロセスの pid（生成順）。
    pub pids: Vec<pid_t>,
    /// まだ reap されていない子プロセスの数。
    pub alive_count: usize,
    pub status: JobStatus,
    /// 直近で完了したプロセスの終了コード（正常終了は 0-255、シグナル終了は 128+sig）。
    /// パイプラインの最終コマンドの終了コードが `$?` として使われる。
    pub last_exit_status: i32,
    /// ジョブがフォアグラウンドを保持したことがあり、現在は保持していない場合にのみ
    /// 有効な回線規約スナップショット。
    pub saved_tty: Option<TtyState>,
}

impl Job {
    /// `jobs` / `stop` / `fg` が表示するステータス文字列。
    pub fn status_str(&self) -> &'static str {
        match self.status {
            JobStatus::Foreground | JobStatus::Background => "Running",
            JobStatus::Stopped | JobStatus::NeedsTerminal => "Stopped",
        }
    }

    /// `[jid]\t<status>\t\t(<cmdline>)` 形式の表示行。
    pub fn status_line(&self) -> String {
        format!("[{}]\t{}\t\t({})", self.jid, self.status_str(), self.cmdline)
    }
}

/// ジョブテーブル。jid → Job の索引（固定容量）と挿入順の索引を両方保持する。
pub struct JobTable {
    slots: Vec<Option<Job>>,
    order: Vec<usize>,
}

impl JobTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_JOBS);
        slots.resize_with(MAX_JOBS, || None);
        Self {
            slots,
            order: Vec::with_capacity(MAX_JOBS),
        }
    }

    /// 最小未使用の正整数 jid（< `MAX_JOBS`）を割り当ててジョブを作成する。
    /// 空き jid がなければ `None`（呼び出し側はこれを致命的エラーとして扱う）。
    pub fn create(&mut self, cmdline: String, background: bool) -> Option<usize> {
        debug_assert!(crate::signal::is_blocked());
        let jid = (1..MAX_JOBS).find(|&i| self.slots[i].is_none())?;
        self.slots[jid] = Some(Job {
            jid,
            pgid: 0,
            cmdline,
            pids: Vec::new(),
            alive_count: 0,
            status: if background {
                JobStatus::Background
            } else {
                JobStatus::Foreground
            },
            last_exit_status: 0,
            saved_tty: None,
        });
        self.order.push(jid);
        Some(jid)
    }

    pub fn get(&self, jid: usize) -> Option<&Job> {
        self.slots.get(jid)?.as_ref()
    }

    pub fn get_mut(&mut self, jid: usize) -> Option<&mut Job> {
        self.slots.get_mut(jid)?.as_mut()
    }

    /// 挿入順でジョブを走査する。
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.order.iter().filter_map(move |&jid| self.slots[jid].as_ref())
    }

    /// `pid` を含むジョブを探す（pgid 一致、または構成プロセスの pid 一致）。
    pub fn find_mut_by_pid(&mut self, pid: pid_t) -> Option<&mut Job> {
        for &jid in &self.order {
            if let Some(job) = self.slots[jid].as_mut() {
                if job.pgid == pid || job.pids.contains(&pid) {
                    return Some(job);
                }
            }
        }
        None
    }

    /// `alive_count == 0` のジョブをすべて回収する（REPL の毎プロンプト前スイープ、
    /// またはフォアグラウンド待機直後）。
    pub fn sweep_reclaimable(&mut self) {
        self.order.retain(|&jid| {
            let done = self.slots[jid]
                .as_ref()
                .map_or(true, |j| j.alive_count == 0);
            if done {
                self.slots[jid] = None;
            }
            !done
        });
    }

    /// 明示的に1つのジョブを回収する（スロット解放、挿入順リストから除去）。
    pub fn reclaim(&mut self, jid: usize) {
        if jid < MAX_JOBS {
            self.slots[jid] = None;
        }
        self.order.retain(|&j| j != jid);
    }
}

// ── Stopped-Job スタック ─────────────────────────────────────────────

/// 最後に停止したジョブが末尾に来る順序付き jid 列。
/// `fg`/`bg` が引数なしで呼ばれたときのデフォルト対象を解決するために使う。
pub struct StoppedStack {
    jids: Vec<usize>,
}

impl StoppedStack {
    pub fn new() -> Self {
        Self {
            jids: Vec::with_capacity(MAX_JOBS),
        }
    }

    /// `jid` を末尾に積む。1回の停止イベントにつき1回だけ呼ばれる前提
    /// （二重登録の防止は呼び出し側の責任）。
    pub fn push(&mut self, jid: usize) {
        self.jids.push(jid);
    }

    /// `jid` を値で除去する。相対順序は保持される。
    pub fn remove(&mut self, jid: usize) {
        self.jids.retain(|&j| j != jid);
    }

    /// 最後に停止したジョブの jid。
    pub fn peek_last(&self) -> Option<usize> {
        self.jids.last().copied()
    }

    /// `jid` がスタックに存在するか。
    pub fn contains(&self, jid: usize) -> bool {
        self.jids.contains(&jid)
    }
}
