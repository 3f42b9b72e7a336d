//! jobsh ライブラリ — ベンチマーク・テスト用にモジュールを公開する。
//!
//! バイナリ本体は `main.rs` の REPL ループ。
//! この `lib.rs` は `benches/bench_main.rs` 等の外部クレートから
//! パーサー・ジョブ制御・スポーン機能に直接アクセスするために存在する。
//!
//! ## モジュール構成
//!
//! | モジュール | 役割 |
//! |-----------|------|
//! | [`editor`] | 行エディタ（raw モード、キー入力、バッファ操作、表示更新） |
//! | [`history`] | コマンド履歴（`~/.jobsh_history` 永続化、↑↓ ナビゲーション） |
//! | [`complete`] | Tab 補完（コマンド名、ファイル名、`&&`/`||`/`;` 後のコマンド位置認識） |
//! | [`highlight`] | シンタックスハイライト（ANSI カラー、PATH キャッシュ、`&&`/`||`/`;`/`${VAR}` 対応） |
//! | [`parser`] | 構文解析（コマンドリスト `&&`/`||`/`;`、パイプライン、リダイレクト、クォート、エスケープ、変数展開 `$VAR`/`${VAR}`/`$?`、`&`） |
//! | [`executor`] | `CommandList` のディスパッチ（`Connector` 条件評価、ビルトイン／launcher への振り分け） |
//! | [`builtins`] | ビルトイン（`exit`, `cd`, `pwd`, `echo`, `export`, `unset`, `jobs`, `kill`, `stop`, `fg`, `bg`, `prompt`） |
//! | [`glob`] | パス名展開（`*`, `?` によるファイル名マッチング） |
//! | [`terminal`] | 端末コントローラ（回線規約の保存/復元、フォアグラウンドプロセスグループの委譲） |
//! | [`signal`] | Signal Gate（`SIGCHLD` ハンドラの設置、マスク/アンマスクの再入可能な深度カウンタ） |
//! | [`job`] | ジョブテーブルと Stopped-Job スタック |
//! | [`reaper`] | 非同期 `SIGCHLD` ハンドラと同期ウェイタ、状態取り込みルーチン |
//! | [`launcher`] | パイプラインの起動（パイプ構築、fork/spawn、端末所有権の受け渡し） |
//! | [`prompt`] | プロンプトテンプレートの展開 |
//! | [`shell`] | シェルのグローバル状態（終了ステータス、ジョブテーブル、端末、プロンプト） |
//! | [`spawn`] | `posix_spawnp` ラッパー（外部コマンド起動の高速化） |

pub mod builtins;
pub mod complete;
pub mod editor;
pub mod executor;
pub mod glob;
pub mod highlight;
pub mod history;
pub mod job;
pub mod launcher;
pub mod parser;
pub mod prompt;
pub mod reaper;
pub mod shell;
pub mod signal;
pub mod spawn;
pub mod terminal;
