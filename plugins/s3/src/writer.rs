//! S3写入器
//!
//! 数据按分片缓冲后交给插件运行时上的后台任务：
//! 只有一片时直接PutObject，否则顺序分片上传。

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use anyhow::{anyhow, bail, Result};
use bytes::{Bytes, BytesMut};
use s3::bucket::Bucket;
use s3::serde_types::Part;
use tokio::io::AsyncWrite;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

/// 分片大小 8MB（S3最小分片5MB）
const CHUNK_SIZE: usize = 8 * 1024 * 1024;
/// 内存中最多缓存的分片数
const MAX_BUFFER_CHUNKS: usize = 2;
const CONTENT_TYPE: &str = "application/octet-stream";

enum ChunkData {
    Part(Bytes),
    Complete,
}

/// How the buffered data will be sent / 上传方式
#[derive(Debug, PartialEq, Eq)]
enum UploadPlan {
    /// Zero or one chunk: a single PutObject
    Single(Bytes),
    /// First two chunks of a multipart upload
    Multipart(Bytes, Bytes),
}

/// Decide from the first messages whether a multipart upload is needed / 决定上传方式
async fn plan_upload(rx: &mut mpsc::Receiver<ChunkData>) -> Result<UploadPlan> {
    let first = match rx.recv().await {
        Some(ChunkData::Part(data)) => data,
        // 空文件
        Some(ChunkData::Complete) => return Ok(UploadPlan::Single(Bytes::new())),
        None => bail!("S3写入器在完成前被丢弃"),
    };

    match rx.recv().await {
        Some(ChunkData::Part(second)) => Ok(UploadPlan::Multipart(first, second)),
        Some(ChunkData::Complete) => Ok(UploadPlan::Single(first)),
        None => bail!("S3写入器在完成前被丢弃"),
    }
}

/// Upload task: one put for a single chunk, multipart otherwise / 后台上传任务
async fn upload(bucket: Box<Bucket>, key: String, mut rx: mpsc::Receiver<ChunkData>) -> Result<()> {
    let (first, second) = match plan_upload(&mut rx).await? {
        UploadPlan::Single(data) => return put_single(&bucket, &key, &data).await,
        UploadPlan::Multipart(first, second) => (first, second),
    };

    let init = bucket
        .initiate_multipart_upload(&key, CONTENT_TYPE)
        .await
        .map_err(|e| anyhow!("初始化分片上传失败: {}", e))?;
    let upload_id = init.upload_id;
    tracing::debug!("S3分片上传开始: key={}, upload_id={}", key, upload_id);

    let result = upload_parts(&bucket, &key, &upload_id, first, second, &mut rx).await;
    match result {
        Ok(parts) => {
            bucket
                .complete_multipart_upload(&key, &upload_id, parts)
                .await
                .map_err(|e| anyhow!("完成分片上传失败: {}", e))?;
            tracing::debug!("S3分片上传完成: key={}", key);
            Ok(())
        }
        Err(e) => {
            // 失败时取消，避免残留未完成的上传
            let _ = bucket.abort_upload(&key, &upload_id).await;
            Err(e)
        }
    }
}

async fn put_single(bucket: &Bucket, key: &str, data: &[u8]) -> Result<()> {
    let response = bucket
        .put_object(key, data)
        .await
        .map_err(|e| anyhow!("上传S3对象失败: {}", e))?;
    match response.status_code() {
        200..=299 => Ok(()),
        code => bail!("上传S3对象失败: HTTP {}", code),
    }
}

async fn upload_parts(
    bucket: &Bucket,
    key: &str,
    upload_id: &str,
    first: Bytes,
    second: Bytes,
    rx: &mut mpsc::Receiver<ChunkData>,
) -> Result<Vec<Part>> {
    let mut parts = Vec::new();
    let mut next = Some(first);
    let mut queued = Some(second);
    let mut part_number = 1u32;

    while let Some(data) = next.take() {
        tracing::debug!("S3上传分片: key={}, part={}, size={}", key, part_number, data.len());
        let part = bucket
            .put_multipart_chunk(data.to_vec(), key, part_number, upload_id, CONTENT_TYPE)
            .await
            .map_err(|e| anyhow!("上传分片失败: part={}, error={}", part_number, e))?;
        parts.push(part);
        part_number += 1;

        next = match queued.take() {
            Some(data) => Some(data),
            None => match rx.recv().await {
                Some(ChunkData::Part(data)) => Some(data),
                Some(ChunkData::Complete) => None,
                None => bail!("S3写入器在完成前被丢弃"),
            },
        };
    }
    Ok(parts)
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ShutdownState {
    NotStarted,
    SendingRemainder,
    SendingComplete,
    Done,
}

/// S3写入器 - 分片缓冲，内存只保留有限分片
pub struct S3Writer {
    tx: Option<mpsc::Sender<ChunkData>>,
    result_rx: Option<oneshot::Receiver<Result<(), String>>>,
    buffer: BytesMut,
    pending_chunk: Option<Bytes>,
    shutdown_state: ShutdownState,
}

impl S3Writer {
    /// Start the upload task on the given runtime / 在插件运行时上启动上传任务
    pub fn new(handle: Handle, bucket: Box<Bucket>, key: String) -> Self {
        let (tx, rx) = mpsc::channel::<ChunkData>(MAX_BUFFER_CHUNKS);
        let (result_tx, result_rx) = oneshot::channel::<Result<(), String>>();

        handle.spawn(async move {
            let result = upload(bucket, key, rx).await;
            let _ = result_tx.send(result.map_err(|e| e.to_string()));
        });

        Self {
            tx: Some(tx),
            result_rx: Some(result_rx),
            buffer: BytesMut::with_capacity(CHUNK_SIZE),
            pending_chunk: None,
            shutdown_state: ShutdownState::NotStarted,
        }
    }

    /// Try to hand the pending chunk to the task; Pending while the channel is full
    fn poll_send_pending(&mut self, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        if let Some(data) = self.pending_chunk.take() {
            let tx = match self.tx.as_ref() {
                Some(tx) => tx,
                None => return Poll::Ready(Err(closed())),
            };
            match tx.try_send(ChunkData::Part(data)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(ChunkData::Part(data))) => {
                    self.pending_chunk = Some(data);
                    cx.waker().wake_by_ref();
                    return Poll::Pending;
                }
                Err(_) => return Poll::Ready(Err(closed())),
            }
        }
        Poll::Ready(Ok(()))
    }
}

fn closed() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::BrokenPipe, "S3上传通道已关闭")
}

impl AsyncWrite for S3Writer {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        if this.shutdown_state != ShutdownState::NotStarted {
            return Poll::Ready(Err(closed()));
        }

        // 有待发送的分片时不接受新数据
        match this.poll_send_pending(cx) {
            Poll::Ready(Ok(())) => {}
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Pending => return Poll::Pending,
        }

        let space = CHUNK_SIZE - this.buffer.len();
        let accepted = buf.len().min(space);
        this.buffer.extend_from_slice(&buf[..accepted]);

        if this.buffer.len() >= CHUNK_SIZE {
            this.pending_chunk = Some(this.buffer.split().freeze());
            if let Poll::Ready(Err(e)) = this.poll_send_pending(cx) {
                return Poll::Ready(Err(e));
            }
        }

        Poll::Ready(Ok(accepted))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();

        loop {
            match this.poll_send_pending(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }

            match this.shutdown_state {
                ShutdownState::NotStarted => {
                    this.shutdown_state = ShutdownState::SendingRemainder;
                }
                ShutdownState::SendingRemainder => {
                    // 发送剩余数据
                    if !this.buffer.is_empty() {
                        this.pending_chunk = Some(this.buffer.split().freeze());
                    }
                    this.shutdown_state = ShutdownState::SendingComplete;
                }
                ShutdownState::SendingComplete => {
                    // 发送完成信号
                    if let Some(tx) = this.tx.take() {
                        match tx.try_send(ChunkData::Complete) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                this.tx = Some(tx);
                                cx.waker().wake_by_ref();
                                return Poll::Pending;
                            }
                            Err(_) => return Poll::Ready(Err(closed())),
                        }
                    }
                    this.shutdown_state = ShutdownState::Done;
                }
                ShutdownState::Done => {
                    // 等待后台任务完成
                    let result_rx = match this.result_rx.as_mut() {
                        Some(rx) => rx,
                        None => return Poll::Ready(Ok(())),
                    };
                    let result = match Pin::new(result_rx).poll(cx) {
                        Poll::Ready(result) => result,
                        Poll::Pending => return Poll::Pending,
                    };
                    this.result_rx = None;
                    return Poll::Ready(match result {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            format!("S3上传失败: {}", e),
                        )),
                        Err(_) => Err(std::io::Error::new(
                            std::io::ErrorKind::BrokenPipe,
                            "S3上传任务异常终止",
                        )),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn plan_for(messages: Vec<ChunkData>) -> Result<UploadPlan> {
        let (tx, mut rx) = mpsc::channel(MAX_BUFFER_CHUNKS + messages.len());
        for message in messages {
            tx.send(message).await.unwrap();
        }
        drop(tx);
        plan_upload(&mut rx).await
    }

    #[tokio::test]
    async fn test_empty_file_is_single_put() {
        let plan = plan_for(vec![ChunkData::Complete]).await.unwrap();
        assert_eq!(plan, UploadPlan::Single(Bytes::new()));
    }

    #[tokio::test]
    async fn test_upload_plan_by_chunk_count() {
        let plan = plan_for(vec![ChunkData::Part(Bytes::from_static(b"abc")), ChunkData::Complete])
            .await
            .unwrap();
        assert_eq!(plan, UploadPlan::Single(Bytes::from_static(b"abc")));

        let plan = plan_for(vec![
            ChunkData::Part(Bytes::from_static(b"a")),
            ChunkData::Part(Bytes::from_static(b"b")),
        ])
        .await
        .unwrap();
        assert_eq!(plan, UploadPlan::Multipart(Bytes::from_static(b"a"), Bytes::from_static(b"b")));
    }

    #[tokio::test]
    async fn test_dropped_writer_fails_upload() {
        assert!(plan_for(vec![]).await.is_err());
        assert!(plan_for(vec![ChunkData::Part(Bytes::from_static(b"a"))]).await.is_err());
    }
}
