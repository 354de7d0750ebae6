//! キャンセルシグナル
//!
//! 呼び出し側のキャンセルと内部タイムアウトを 1 つのシグナルにまとめて、
//! 接続・送信・受信のすべてのフェーズで同じシグナルを監視する。
//!
//! ```ignore
//! use tokio_http1_engine::{CancelSignal, CancelSource, combine};
//!
//! let source = CancelSource::new();
//! let signal = combine([source.signal(), CancelSignal::timeout(Duration::from_secs(5))]);
//! source.cancel();
//! assert_eq!(signal.cancelled().await, CancelCause::Cancelled);
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::AbortHandle;

/// キャンセルの原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelCause {
    /// 呼び出し側によるキャンセル
    Cancelled,
    /// 内部タイマーの発火
    Timeout { after: Duration },
}

/// キャンセルを発火する側
#[derive(Debug, Clone)]
pub struct CancelSource {
    tx: Arc<watch::Sender<Option<CancelCause>>>,
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSource {
    /// 新しいソースを作成
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// このソースを監視するシグナル
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: Some(self.tx.subscribe()),
            _guard: None,
        }
    }

    /// 呼び出し側キャンセルとして発火
    pub fn cancel(&self) {
        self.fire(CancelCause::Cancelled);
    }

    /// 原因を指定して発火
    ///
    /// すでに発火済みの場合は何もせず false を返す。
    pub fn fire(&self, cause: CancelCause) -> bool {
        fire(&self.tx, cause)
    }

    /// 発火済みか
    pub fn is_fired(&self) -> bool {
        self.tx.borrow().is_some()
    }

    #[cfg(test)]
    fn observers(&self) -> usize {
        self.tx.receiver_count()
    }
}

fn fire(tx: &watch::Sender<Option<CancelCause>>, cause: CancelCause) -> bool {
    tx.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = Some(cause);
        true
    })
}

/// シグナルに付随するタスクと送信側
///
/// 最後のシグナルが破棄されるとタスクを止める。
struct SignalGuard {
    tasks: Vec<AbortHandle>,
    _tx: Arc<watch::Sender<Option<CancelCause>>>,
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl fmt::Debug for SignalGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalGuard")
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

/// キャンセルを監視する側
///
/// `Default` は決して発火しないシグナル。
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<Option<CancelCause>>>,
    _guard: Option<Arc<SignalGuard>>,
}

impl CancelSignal {
    /// 決して発火しないシグナル
    pub fn never() -> Self {
        Self::default()
    }

    /// `after` 経過後に Timeout として発火するシグナル
    ///
    /// タイマーはシグナル (とその複製) がすべて破棄されると止まる。
    pub fn timeout(after: Duration) -> Self {
        let (tx, rx) = watch::channel(None);
        let tx = Arc::new(tx);
        let timer_tx = tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            fire(&timer_tx, CancelCause::Timeout { after });
        });
        Self {
            rx: Some(rx),
            _guard: Some(Arc::new(SignalGuard {
                tasks: vec![task.abort_handle()],
                _tx: tx,
            })),
        }
    }

    /// 発火していれば原因を返す
    pub fn cause(&self) -> Option<CancelCause> {
        self.rx.as_ref().and_then(|rx| rx.borrow().clone())
    }

    /// 発火済みか
    pub fn is_cancelled(&self) -> bool {
        self.cause().is_some()
    }

    /// 発火するまで待つ
    ///
    /// 発火しないまま送信側が無くなった場合は永久に待つ。
    pub async fn cancelled(&self) -> CancelCause {
        if let Some(rx) = &self.rx {
            let mut rx = rx.clone();
            let cause = match rx.wait_for(Option::is_some).await {
                Ok(value) => value.clone(),
                Err(_) => None,
            };
            if let Some(cause) = cause {
                return cause;
            }
        }
        std::future::pending().await
    }
}

/// 複数のシグナルを合成する
///
/// 最初に発火したシグナルの原因で発火する。発火後、または合成結果が
/// すべて破棄された後は上流のシグナルを監視しない。
pub fn combine<I>(signals: I) -> CancelSignal
where
    I: IntoIterator<Item = CancelSignal>,
{
    let upstream: Vec<CancelSignal> = signals.into_iter().filter(|s| s.rx.is_some()).collect();
    if upstream.is_empty() {
        return CancelSignal::never();
    }

    let (tx, rx) = watch::channel(None);
    let tx = Arc::new(tx);

    // 発火済みのものがあれば先頭のものを採用する
    if let Some(cause) = upstream.iter().find_map(CancelSignal::cause) {
        fire(&tx, cause);
        return CancelSignal {
            rx: Some(rx),
            _guard: Some(Arc::new(SignalGuard {
                tasks: Vec::new(),
                _tx: tx,
            })),
        };
    }

    let mut tasks = Vec::with_capacity(upstream.len());
    for signal in upstream {
        let forward_tx = tx.clone();
        let mut combined_rx = rx.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                cause = signal.cancelled() => {
                    fire(&forward_tx, cause);
                }
                _ = combined_rx.wait_for(Option::is_some) => {}
            }
        });
        tasks.push(task.abort_handle());
    }

    CancelSignal {
        rx: Some(rx),
        _guard: Some(Arc::new(SignalGuard { tasks, _tx: tx })),
    }
}
