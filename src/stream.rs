//! Cancellable result stream / 可取消的结果流
//!
//! A handoff channel between scan tasks and the consumer. A producer
//! blocks until the consumer takes the item or the stream is
//! force-closed; force-close releases every blocked producer at once
//! and makes all later handoffs fail. The blocking handoff is the
//! authoritative cancellation signal; `is_cancelled` is only an
//! advisory short-circuit before expensive work.
//! 扫描任务与消费者之间的交接通道。生产者阻塞直到消费者取走条目或
//! 流被强制关闭；强制关闭会一次性释放所有被阻塞的生产者，并使之后
//! 的交接全部失败。阻塞交接是权威的取消信号；is_cancelled 只是
//! 开销较大的工作前的建议性短路检查。

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::SearchError;
use crate::models::SearchMatch;

/// Create a connected sender/stream pair / 创建一对相连的发送端与流
pub fn match_channel() -> (MatchSender, MatchStream) {
    let (tx, rx) = mpsc::channel(1);
    let token = CancellationToken::new();
    let failure = Arc::new(Mutex::new(None));

    (
        MatchSender {
            tx,
            token: token.clone(),
            failure: failure.clone(),
        },
        MatchStream { rx, token, failure },
    )
}

/// Producer side / 生产者端
#[derive(Clone)]
pub struct MatchSender {
    tx: mpsc::Sender<SearchMatch>,
    token: CancellationToken,
    failure: Arc<Mutex<Option<SearchError>>>,
}

impl MatchSender {
    /// Hand one match to the consumer. Returns false when the stream was
    /// closed before delivery; the item is dropped and must not be
    /// retried.
    /// 向消费者交接一条命中。流在交付前关闭时返回 false；条目被丢弃，
    /// 不得重试。
    pub async fn send(&self, item: SearchMatch) -> bool {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            sent = self.tx.send(item) => sent.is_ok(),
        }
    }

    /// Advisory check before starting expensive work / 开始重活前的建议性检查
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Record a systemic failure and tear the stream down. Only the
    /// first failure is kept.
    /// 记录系统性故障并关闭流。只保留第一个故障。
    pub(crate) fn abort(&self, err: SearchError) {
        {
            let mut slot = self.failure.lock();
            if slot.is_none() {
                *slot = Some(err);
            }
        }
        self.token.cancel();
    }
}

/// Consumer side / 消费者端
pub struct MatchStream {
    rx: mpsc::Receiver<SearchMatch>,
    token: CancellationToken,
    failure: Arc<Mutex<Option<SearchError>>>,
}

impl MatchStream {
    /// Receive the next match. `None` means the stream closed: either
    /// all producers finished or the stream was force-closed; the two
    /// are indistinguishable here.
    /// 接收下一条命中。None 表示流已关闭：生产者全部结束或流被
    /// 强制关闭，两者在此无法区分。
    pub async fn recv(&mut self) -> Option<SearchMatch> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            item = self.rx.recv() => item,
        }
    }

    /// One-way close: releases every blocked producer without
    /// delivering their pending item. Idempotent.
    /// 单向关闭：释放所有被阻塞的生产者且不交付其待发条目。幂等。
    pub fn force_close(&self) {
        self.token.cancel();
    }

    /// Side channel for systemic failures, populated once the search
    /// aborted. Empty after a normal or consumer-cancelled run.
    /// 系统性故障的旁路通道，搜索中止后可读。正常结束或消费者取消后为空。
    pub fn failure(&mut self) -> Option<SearchError> {
        self.failure.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample(n: usize) -> SearchMatch {
        SearchMatch {
            archive_path: format!("/logs/a{}.zip", n),
            entry_name: "doc.xml".to_string(),
            content: "<doc/>".to_string(),
            pattern: "doc".to_string(),
        }
    }

    #[tokio::test]
    async fn test_handoff_delivers() {
        let (tx, mut rx) = match_channel();

        let producer = tokio::spawn(async move { tx.send(sample(1)).await });

        let item = rx.recv().await.unwrap();
        assert_eq!(item.archive_path, "/logs/a1.zip");
        assert!(producer.await.unwrap());
    }

    #[tokio::test]
    async fn test_exhaustion_closes_stream() {
        let (tx, mut rx) = match_channel();
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_force_close_releases_blocked_producers() {
        let (tx, mut rx) = match_channel();

        // Occupy the handoff slot so every later producer blocks.
        assert!(tx.send(sample(0)).await);

        let mut producers = Vec::new();
        for n in 1..=3 {
            let tx = tx.clone();
            producers.push(tokio::spawn(async move { tx.send(sample(n)).await }));
        }

        // Let all three reach the blocked send.
        tokio::time::sleep(Duration::from_millis(50)).await;

        rx.force_close();
        rx.force_close(); // idempotent

        for p in producers {
            assert!(!p.await.unwrap(), "blocked producer must report not-delivered");
        }

        // No later handoff succeeds, and the consumer sees a closed stream.
        assert!(!tx.send(sample(9)).await);
        assert!(tx.is_cancelled());
        assert!(rx.recv().await.is_none());
        assert!(rx.failure().is_none());
    }

    #[tokio::test]
    async fn test_abort_surfaces_failure() {
        let (tx, mut rx) = match_channel();

        tx.abort(SearchError::Cache(anyhow::anyhow!("disk full")));
        tx.abort(SearchError::Connection(anyhow::anyhow!("later")));

        assert!(!tx.send(sample(1)).await);
        assert!(rx.recv().await.is_none());

        // First failure wins.
        match rx.failure() {
            Some(SearchError::Cache(_)) => {}
            other => panic!("unexpected failure slot: {:?}", other),
        }
    }
}
