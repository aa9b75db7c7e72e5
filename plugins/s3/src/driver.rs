//! S3 FileIO核心实现
//!
//! - 路径格式: s3://bucket/key
//! - 所有请求在插件自己的tokio运行时上执行，宿主只等待结果
//! - 目录用以 `/` 结尾的空对象表示

use std::collections::HashMap;
use std::future::Future;
use std::ops::Range;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::Region;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::runtime::Runtime;

use yaolist_fileio::storage::Entry;
use yaolist_fileio::{FileIO, Options};

use crate::config::S3Config;
use crate::writer::S3Writer;

const SCHEMES: &[&str] = &["s3://", "s3a://", "s3n://"];

/// Split `s3://bucket/key` into bucket and key / 解析S3路径
pub fn parse_s3_path(path: &str) -> Result<(String, String)> {
    let rest = SCHEMES
        .iter()
        .find_map(|scheme| {
            let matches = path
                .get(..scheme.len())
                .map_or(false, |p| p.eq_ignore_ascii_case(scheme));
            if matches {
                path.get(scheme.len()..)
            } else {
                None
            }
        })
        .ok_or_else(|| anyhow!("Not an S3 path: {}", path))?;

    let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() {
        bail!("Missing bucket in S3 path: {}", path);
    }
    Ok((bucket.to_string(), key.trim_start_matches('/').to_string()))
}

/// 获取目录前缀
fn dir_prefix(key: &str) -> String {
    let key = key.trim_end_matches('/');
    if key.is_empty() {
        String::new()
    } else {
        format!("{}/", key)
    }
}

fn entry_name(key: &str) -> String {
    key.trim_end_matches('/').rsplit('/').next().unwrap_or("").to_string()
}

fn dir_entry(bucket: &str, key: &str) -> Entry {
    Entry {
        name: entry_name(key),
        path: format!("s3://{}/{}", bucket, key.trim_end_matches('/')),
        is_dir: true,
        size: 0,
        modified: None,
    }
}

/// S3 FileIO
pub struct S3FileIO {
    config: Option<S3Config>,
    runtime: Option<Runtime>,
    buckets: Mutex<HashMap<String, Box<Bucket>>>,
}

impl S3FileIO {
    pub fn new() -> Self {
        Self {
            config: None,
            runtime: None,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn runtime(&self) -> Result<&Runtime> {
        self.runtime.as_ref().ok_or_else(|| anyhow!("S3 FileIO used before configure"))
    }

    /// Run a request on the plugin runtime / 在插件运行时上执行
    async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.runtime()?.spawn(fut);
        handle.await.map_err(|e| anyhow!("S3 task failed: {}", e))?
    }

    /// 获取（缓存的）Bucket客户端
    fn bucket(&self, name: &str) -> Result<Box<Bucket>> {
        let mut buckets = self.buckets.lock();
        if let Some(bucket) = buckets.get(name) {
            return Ok(bucket.clone());
        }
        let config = self.config.as_ref().ok_or_else(|| anyhow!("S3 FileIO used before configure"))?;
        let bucket = create_bucket(config, name)?;
        buckets.insert(name.to_string(), bucket.clone());
        Ok(bucket)
    }

    /// File or directory status, None when absent / 获取状态
    async fn stat(&self, bucket_name: &str, key: &str) -> Result<Option<Entry>> {
        if key.is_empty() {
            return Ok(Some(dir_entry(bucket_name, "")));
        }
        let bucket = self.bucket(bucket_name)?;
        let (bucket_name, key) = (bucket_name.to_string(), key.to_string());

        self.run(async move {
            if !key.ends_with('/') {
                let (head, code) = bucket
                    .head_object(&key)
                    .await
                    .map_err(|e| anyhow!("获取S3对象信息失败: {}", e))?;
                if code == 200 {
                    return Ok(Some(Entry {
                        name: entry_name(&key),
                        path: format!("s3://{}/{}", bucket_name, key),
                        is_dir: false,
                        size: head.content_length.unwrap_or(0).max(0) as u64,
                        modified: head.last_modified,
                    }));
                }
                if code != 404 {
                    bail!("获取S3对象信息失败: HTTP {}", code);
                }
            }

            // 目录：存在以该前缀开头的对象，只取一条
            let prefix = dir_prefix(&key);
            let (page, _) = bucket
                .list_page(prefix.clone(), Some("/".to_string()), None, None, Some(1))
                .await
                .map_err(|e| anyhow!("列出S3对象失败: {}", e))?;
            let found = !page.contents.is_empty()
                || page.common_prefixes.as_ref().map_or(false, |p| !p.is_empty());
            Ok(found.then(|| dir_entry(&bucket_name, &prefix)))
        })
        .await
    }

    /// All object keys under a prefix / 列出前缀下所有对象
    async fn keys_under(&self, bucket: Box<Bucket>, prefix: String) -> Result<Vec<String>> {
        self.run(async move {
            let results = bucket
                .list(prefix, None)
                .await
                .map_err(|e| anyhow!("列出S3对象失败: {}", e))?;
            Ok(results.into_iter().flat_map(|r| r.contents).map(|o| o.key).collect())
        })
        .await
    }
}

impl Default for S3FileIO {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for S3FileIO {
    fn drop(&mut self) {
        // may be dropped inside the host runtime, where a blocking shutdown panics
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// 创建S3 Bucket客户端
fn create_bucket(config: &S3Config, name: &str) -> Result<Box<Bucket>> {
    let credentials = match (&config.access_key_id, &config.secret_access_key) {
        (Some(access), Some(secret)) => Credentials::new(
            Some(access.as_str()),
            Some(secret.as_str()),
            config.session_token.as_deref(),
            None,
            None,
        ),
        _ => Credentials::anonymous(),
    }
    .map_err(|e| anyhow!("创建S3凭证失败: {}", e))?;

    let region = Region::Custom {
        region: config.region.clone(),
        endpoint: config.endpoint.clone(),
    };

    let bucket = Bucket::new(name, region, credentials)
        .map_err(|e| anyhow!("创建S3 Bucket失败: {}", e))?;

    Ok(if config.force_path_style {
        bucket.with_path_style()
    } else {
        bucket
    })
}

#[async_trait]
impl FileIO for S3FileIO {
    fn is_object_store(&self) -> bool {
        true
    }

    async fn configure(&mut self, options: &Options) -> Result<()> {
        let config = S3Config::from_options(options)?;
        tracing::debug!("S3 FileIO configured: {:?}", config);

        if self.runtime.is_none() {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .thread_name("yaolist-s3")
                .enable_all()
                .build()
                .map_err(|e| anyhow!("创建S3运行时失败: {}", e))?;
            self.runtime = Some(runtime);
        }

        self.buckets.lock().clear();
        self.config = Some(config);
        Ok(())
    }

    async fn open_reader(
        &self,
        path: &str,
        range: Option<Range<u64>>,
    ) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
        let (bucket_name, key) = parse_s3_path(path)?;
        let bucket = self.bucket(&bucket_name)?;

        let data = self.run(async move {
            // rust-s3的range结束位置是闭区间
            let response = match range {
                Some(r) if r.end <= r.start => return Ok(Vec::new()),
                Some(r) => bucket.get_object_range(&key, r.start, Some(r.end - 1)).await,
                None => bucket.get_object(&key).await,
            }
            .map_err(|e| anyhow!("获取S3对象失败: {}", e))?;

            match response.status_code() {
                200 | 206 => Ok(response.bytes().to_vec()),
                404 => bail!("S3对象不存在: {}", key),
                code => bail!("获取S3对象失败: HTTP {}", code),
            }
        })
        .await?;

        // rust-s3返回完整响应，封装为AsyncRead
        Ok(Box::new(std::io::Cursor::new(data)))
    }

    async fn open_writer(
        &self,
        path: &str,
        overwrite: bool,
    ) -> Result<Box<dyn AsyncWrite + Unpin + Send>> {
        let (bucket_name, key) = parse_s3_path(path)?;
        if key.is_empty() || key.ends_with('/') {
            bail!("Cannot write to a directory path: {}", path);
        }
        if !overwrite && self.stat(&bucket_name, &key).await?.is_some() {
            bail!("File already exists: {}", path);
        }

        let bucket = self.bucket(&bucket_name)?;
        let handle = self.runtime()?.handle().clone();
        Ok(Box::new(S3Writer::new(handle, bucket, key)))
    }

    async fn get_status(&self, path: &str) -> Result<Entry> {
        let (bucket_name, key) = parse_s3_path(path)?;
        self.stat(&bucket_name, &key)
            .await?
            .ok_or_else(|| anyhow!("S3路径不存在: {}", path))
    }

    async fn list(&self, path: &str) -> Result<Vec<Entry>> {
        let (bucket_name, key) = parse_s3_path(path)?;
        let bucket = self.bucket(&bucket_name)?;
        let prefix = dir_prefix(&key);

        self.run(async move {
            let results = bucket
                .list(prefix.clone(), Some("/".to_string()))
                .await
                .map_err(|e| anyhow!("列出S3对象失败: {}", e))?;

            let mut entries = Vec::new();
            for result in results {
                // 处理目录（公共前缀）
                for cp in result.common_prefixes.unwrap_or_default() {
                    if entry_name(&cp.prefix).is_empty() {
                        continue;
                    }
                    entries.push(dir_entry(&bucket_name, &cp.prefix));
                }

                // 处理文件（跳过目录标记对象）
                for obj in result.contents {
                    if obj.key.ends_with('/') {
                        continue;
                    }
                    entries.push(Entry {
                        name: entry_name(&obj.key),
                        path: format!("s3://{}/{}", bucket_name, obj.key),
                        is_dir: false,
                        size: obj.size,
                        modified: Some(obj.last_modified.clone()),
                    });
                }
            }

            entries.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(entries)
        })
        .await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let (bucket_name, key) = parse_s3_path(path)?;
        Ok(self.stat(&bucket_name, &key).await?.is_some())
    }

    async fn delete(&self, path: &str, recursive: bool) -> Result<bool> {
        let (bucket_name, key) = parse_s3_path(path)?;
        let status = match self.stat(&bucket_name, &key).await? {
            Some(s) => s,
            None => return Ok(false),
        };
        let bucket = self.bucket(&bucket_name)?;

        let keys = if status.is_dir {
            let keys = self.keys_under(bucket.clone(), dir_prefix(&key)).await?;
            let has_children = keys.iter().any(|k| *k != dir_prefix(&key));
            if has_children && !recursive {
                bail!("Directory not empty: {}", path);
            }
            keys
        } else {
            vec![key]
        };

        tracing::debug!("S3删除: {} ({} objects)", path, keys.len());
        self.run(async move {
            for key in keys {
                bucket
                    .delete_object(&key)
                    .await
                    .map_err(|e| anyhow!("删除S3对象失败: {}", e))?;
            }
            Ok(())
        })
        .await?;
        Ok(true)
    }

    async fn create_dir(&self, path: &str) -> Result<bool> {
        let (bucket_name, key) = parse_s3_path(path)?;
        if let Some(status) = self.stat(&bucket_name, &key).await? {
            if !status.is_dir {
                bail!("Path exists and is not a directory: {}", path);
            }
            return Ok(true);
        }

        let bucket = self.bucket(&bucket_name)?;
        let marker = dir_prefix(&key);
        self.run(async move {
            bucket
                .put_object(&marker, &[])
                .await
                .map_err(|e| anyhow!("创建S3目录失败: {}", e))?;
            Ok(())
        })
        .await?;
        Ok(true)
    }

    async fn rename(&self, src: &str, dst: &str) -> Result<bool> {
        let (src_bucket, src_key) = parse_s3_path(src)?;
        let (dst_bucket, dst_key) = parse_s3_path(dst)?;
        if src_bucket != dst_bucket {
            bail!("Rename across buckets is not supported: {} -> {}", src, dst);
        }

        let status = match self.stat(&src_bucket, &src_key).await? {
            Some(s) => s,
            None => return Ok(false),
        };
        if self.stat(&dst_bucket, &dst_key).await?.is_some() {
            tracing::debug!("Rename target already exists: {}", dst);
            return Ok(false);
        }

        let bucket = self.bucket(&src_bucket)?;
        // 非原子：逐个复制后删除
        let moves: Vec<(String, String)> = if status.is_dir {
            let src_prefix = dir_prefix(&src_key);
            let dst_prefix = dir_prefix(&dst_key);
            self.keys_under(bucket.clone(), src_prefix.clone())
                .await?
                .into_iter()
                .map(|k| {
                    let target = format!("{}{}", dst_prefix, &k[src_prefix.len()..]);
                    (k, target)
                })
                .collect()
        } else {
            vec![(src_key, dst_key)]
        };

        tracing::debug!("S3重命名: {} -> {} ({} objects)", src, dst, moves.len());
        self.run(async move {
            for (from, to) in moves {
                s3_copy_object(&bucket, &from, &to).await?;
                bucket
                    .delete_object(&from)
                    .await
                    .map_err(|e| anyhow!("删除S3原对象失败: {}", e))?;
            }
            Ok(())
        })
        .await?;
        Ok(true)
    }
}

/// S3 CopyObject - 使用copy_object_internal，验证复制结果
async fn s3_copy_object(bucket: &Bucket, src_key: &str, dst_key: &str) -> Result<()> {
    // copy_object_internal的from参数需要URL编码（中文等非ASCII字符）
    let encoded_src = urlencoding::encode(src_key);

    bucket
        .copy_object_internal(encoded_src.as_ref(), dst_key)
        .await
        .map_err(|e| anyhow!("S3 CopyObject失败: {}", e))?;

    let (_, code) = bucket
        .head_object(dst_key)
        .await
        .map_err(|e| anyhow!("验证复制结果失败: {}", e))?;

    if code != 200 {
        bail!("S3 CopyObject后新文件不存在, head返回: {}", code);
    }
    Ok(())
}
