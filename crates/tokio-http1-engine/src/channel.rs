//! ボディチャネル
//!
//! ソケットを読むタスクから呼び出し側へボディを渡す容量制限付きのキュー。
//! 送信側はキューに空きができるまで待つので、読み手が遅いとソケットの
//! 読み込みも止まる。
//!
//! 失敗は共有の結果スロットに記録され、キューに残っているデータより
//! 先に読み手へ届く。

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use crate::decompress::Decoder;
use crate::error::{Error, Result};

/// キューに積めるチャンク数
pub const DEFAULT_BODY_CHANNEL_CAPACITY: usize = 8;

#[derive(Debug)]
enum Outcome {
    Pending,
    Complete,
    Failed(Error),
}

/// ボディチャネルを作成
pub(crate) fn body_channel(capacity: usize) -> (BodySender, Body) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let outcome = Arc::new(Mutex::new(Outcome::Pending));
    (
        BodySender {
            tx,
            outcome: outcome.clone(),
        },
        Body {
            rx: Some(rx),
            outcome,
            decoders: Vec::new(),
            pending: VecDeque::new(),
            done: false,
        },
    )
}

/// 読み手が既に破棄されている
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReceiverDropped;

/// ボディの送信側
#[derive(Debug)]
pub(crate) struct BodySender {
    tx: mpsc::Sender<Bytes>,
    outcome: Arc<Mutex<Outcome>>,
}

impl BodySender {
    /// チャンクを送る (キューに空きができるまで待つ)
    pub(crate) async fn send(&self, data: Bytes) -> std::result::Result<(), ReceiverDropped> {
        if data.is_empty() {
            return Ok(());
        }
        self.tx.send(data).await.map_err(|_| ReceiverDropped)
    }

    /// 正常終了
    pub(crate) fn complete(self) {
        self.resolve(Outcome::Complete);
    }

    /// 失敗として終了
    pub(crate) fn fail(self, error: Error) {
        self.resolve(Outcome::Failed(error));
    }

    fn resolve(self, outcome: Outcome) {
        if let Ok(mut slot) = self.outcome.lock()
            && matches!(*slot, Outcome::Pending)
        {
            *slot = outcome;
        }
        // self.tx がここで破棄され、待っている読み手が起きる
    }
}

/// レスポンスボディ
///
/// ヘッダー受信後もソケットから流れてくるボディを順に読む。
/// Content-Encoding を展開する場合は展開後のデータを返す。
pub struct Body {
    rx: Option<mpsc::Receiver<Bytes>>,
    outcome: Arc<Mutex<Outcome>>,
    decoders: Vec<Decoder>,
    pending: VecDeque<Bytes>,
    done: bool,
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body")
            .field("decoders", &self.decoders.len())
            .field("done", &self.done)
            .finish()
    }
}

impl Body {
    /// 空のボディ
    pub fn empty() -> Self {
        let (sender, body) = body_channel(1);
        sender.complete();
        body
    }

    /// 展開器を追加 (外側のコーディングから順に)
    pub(crate) fn push_decoder(&mut self, decoder: Decoder) {
        self.decoders.push(decoder);
    }

    fn failure(&self) -> Option<Error> {
        match self.outcome.lock() {
            Ok(slot) => match &*slot {
                Outcome::Failed(e) => Some(e.clone()),
                _ => None,
            },
            Err(_) => Some(Error::Io(Arc::new(std::io::Error::other(
                "body state lock poisoned",
            )))),
        }
    }

    /// 送信側から次の生データを受け取る
    ///
    /// 終端では `Ok(None)`。
    async fn next_raw(&mut self) -> Result<Option<Bytes>> {
        if let Some(e) = self.failure() {
            return Err(e);
        }
        let Some(rx) = self.rx.as_mut() else {
            return Ok(None);
        };
        match rx.recv().await {
            Some(data) => {
                // 受信待ちの間に失敗した場合はデータを捨てる
                if let Some(e) = self.failure() {
                    return Err(e);
                }
                Ok(Some(data))
            }
            None => {
                self.rx = None;
                if let Some(e) = self.failure() {
                    return Err(e);
                }
                let complete = matches!(
                    self.outcome.lock().as_deref(),
                    Ok(Outcome::Complete)
                );
                if complete {
                    Ok(None)
                } else {
                    Err(Error::Io(Arc::new(std::io::Error::other(
                        "body sender dropped before completion",
                    ))))
                }
            }
        }
    }

    /// 次のチャンクを読む
    ///
    /// ボディの終端では `Ok(None)`。失敗した場合はその原因を返し、
    /// 以降も同じエラーを返す。
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(data) = self.pending.pop_front() {
                return Ok(Some(data));
            }
            if self.done {
                if let Some(e) = self.failure() {
                    return Err(e);
                }
                return Ok(None);
            }
            match self.next_raw().await? {
                Some(data) => {
                    let out = self.decode(&data)?;
                    if !out.is_empty() {
                        return Ok(Some(out));
                    }
                }
                None => {
                    self.done = true;
                    let out = self.finish_decoders()?;
                    if !out.is_empty() {
                        self.pending.push_back(out);
                    }
                }
            }
        }
    }

    /// 残りのボディをすべて読む
    pub async fn bytes(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    /// 残りのボディをすべて読み、文字列にする (不正な UTF-8 は置換する)
    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn decode(&mut self, data: &Bytes) -> Result<Bytes> {
        if self.decoders.is_empty() {
            return Ok(data.clone());
        }
        let mut buf = data.to_vec();
        for decoder in &mut self.decoders {
            buf = decoder.decode(&buf)?;
        }
        Ok(Bytes::from(buf))
    }

    fn finish_decoders(&mut self) -> Result<Bytes> {
        let mut carry: Vec<u8> = Vec::new();
        for decoder in &mut self.decoders {
            let mut out = if carry.is_empty() {
                Vec::new()
            } else {
                decoder.decode(&carry)?
            };
            out.extend(decoder.finish()?);
            carry = out;
        }
        Ok(Bytes::from(carry))
    }
}
