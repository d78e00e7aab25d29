//! Local directory backend.
//!
//! Stateless apart from the base directory, so it is cheap to clone
//! and share between handler instances.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use async_stream::stream;
use bytes::{Bytes, BytesMut};
use futures_util::{FutureExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::davpath::DavPath;
use crate::fs::*;

const READ_BUF_SIZE: usize = 65536;

/// Serves a directory on the local filesystem.
pub struct LocalFs {
    basedir: PathBuf,
    public: bool,
}

impl LocalFs {
    /// Create a new LocalFs serving `base`.
    ///
    /// With `public` set, created files and directories are world
    /// readable (mode 644/755), otherwise private (600/700). Umask
    /// still applies.
    pub fn new(base: impl Into<PathBuf>, public: bool) -> Arc<LocalFs> {
        Arc::new(LocalFs {
            basedir: base.into(),
            public,
        })
    }

    fn abs_path(&self, path: &DavPath) -> PathBuf {
        self.basedir.join(path.as_rel_ospath())
    }

    fn file_info(&self, dav_path: String, meta: &std::fs::Metadata) -> FileInfo {
        let modified = meta.modified().unwrap_or(UNIX_EPOCH);
        let is_dir = meta.is_dir();
        let size = if is_dir { 0 } else { meta.len() };
        let mime_type = if is_dir {
            None
        } else {
            mime_guess::from_path(&dav_path)
                .first()
                .map(|m| m.essence_str().to_string())
        };
        FileInfo {
            etag: FileInfo::make_etag(modified, size),
            path: dav_path,
            size,
            modified,
            is_dir,
            mime_type,
        }
    }

    async fn stat_abs(&self, dav_path: String, abs: &Path) -> FsResult<FileInfo> {
        let meta = tokio::fs::metadata(abs).await?;
        Ok(self.file_info(dav_path, &meta))
    }

    async fn check_parent(&self, path: &DavPath) -> FsResult<()> {
        let parent = self.abs_path(&path.parent());
        match tokio::fs::metadata(&parent).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(FsError::ParentNotFound),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(FsError::ParentNotFound),
            Err(e) => Err(e.into()),
        }
    }

    // Copy one regular file, preserving the mode bits.
    async fn copy_file(&self, from: &Path, to: &Path) -> FsResult<()> {
        if let Err(e) = tokio::fs::copy(from, to).await {
            debug!("copy {from:?} {to:?} failed: {e}");
            return Err(e.into());
        }
        Ok(())
    }

    // Recursively duplicate a directory tree.
    async fn copy_tree(&self, from: &Path, to: &Path) -> FsResult<()> {
        let mut todo = vec![(from.to_path_buf(), to.to_path_buf())];
        while let Some((src, dst)) = todo.pop() {
            let mut rd = tokio::fs::read_dir(&src).await?;
            while let Some(entry) = rd.next_entry().await? {
                let meta = entry.metadata().await?;
                let dst_entry = dst.join(entry.file_name());
                if meta.is_dir() {
                    self.mkdir_with_mode(&dst_entry, &meta).await?;
                    todo.push((entry.path(), dst_entry));
                } else {
                    self.copy_file(&entry.path(), &dst_entry).await?;
                }
            }
        }
        Ok(())
    }

    async fn mkdir_with_mode(&self, abs: &Path, src_meta: &std::fs::Metadata) -> FsResult<()> {
        let mut dir = tokio::fs::DirBuilder::new();
        #[cfg(unix)]
        {
            use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
            dir.mode(src_meta.permissions().mode() & 0o777);
        }
        #[cfg(not(unix))]
        let _ = src_meta;
        Ok(dir.create(abs).await?)
    }

    async fn remove_tree(&self, abs: &Path) -> FsResult<()> {
        let meta = tokio::fs::metadata(abs).await?;
        if meta.is_dir() {
            Ok(tokio::fs::remove_dir_all(abs).await?)
        } else {
            Ok(tokio::fs::remove_file(abs).await?)
        }
    }
}

impl DavFileSystem for LocalFs {
    fn stat<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, FileInfo> {
        async move {
            self.stat_abs(path.as_str().to_string(), &self.abs_path(path))
                .await
        }
        .boxed()
    }

    fn open<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, FsStream<Bytes>> {
        async move {
            trace!("FS: open {path:?}");
            let mut file = tokio::fs::File::open(self.abs_path(path)).await?;
            Ok(Box::pin(stream! {
                loop {
                    let mut buf = BytesMut::with_capacity(READ_BUF_SIZE);
                    match file.read_buf(&mut buf).await {
                        Ok(0) => break,
                        Ok(_) => yield Ok(buf.freeze()),
                        Err(e) => {
                            yield Err(e.into());
                            break;
                        }
                    }
                }
            }) as FsStream<Bytes>)
        }
        .boxed()
    }

    fn read_dir<'a>(
        &'a self,
        path: &'a DavPath,
        recursive: bool,
    ) -> FsFuture<'a, FsStream<FileInfo>> {
        async move {
            trace!("FS: read_dir {path:?} recursive={recursive}");
            let abs = self.abs_path(path);
            let root = self.stat_abs(path.as_str().to_string(), &abs).await?;
            if !root.is_dir {
                return Err(FsError::NotFound);
            }
            let this = LocalFs {
                basedir: self.basedir.clone(),
                public: self.public,
            };
            Ok(Box::pin(stream! {
                yield Ok(root.clone());
                let mut todo = vec![(abs, root.path.clone())];
                while let Some((dir, dav_dir)) = todo.pop() {
                    let mut rd = match tokio::fs::read_dir(&dir).await {
                        Ok(rd) => rd,
                        Err(e) => {
                            yield Err(e.into());
                            return;
                        }
                    };
                    loop {
                        match rd.next_entry().await {
                            Ok(Some(entry)) => {
                                let name = match entry.file_name().into_string() {
                                    Ok(name) => name,
                                    // names the protocol cannot express are hidden.
                                    Err(_) => continue,
                                };
                                let dav_path = if dav_dir == "/" {
                                    format!("/{name}")
                                } else {
                                    format!("{dav_dir}/{name}")
                                };
                                match entry.metadata().await {
                                    Ok(meta) => {
                                        let fi = this.file_info(dav_path, &meta);
                                        if recursive && fi.is_dir {
                                            todo.push((entry.path(), fi.path.clone()));
                                        }
                                        yield Ok(fi);
                                    }
                                    Err(e) => {
                                        debug!("read_dir: metadata failed: {e}");
                                        yield Err(e.into());
                                        return;
                                    }
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                yield Err(e.into());
                                return;
                            }
                        }
                    }
                }
            }) as FsStream<FileInfo>)
        }
        .boxed()
    }

    fn create<'a>(
        &'a self,
        path: &'a DavPath,
        mut body: FsBody,
        conditions: &'a Conditions,
    ) -> FsFuture<'a, (FileInfo, bool)> {
        async move {
            trace!("FS: create {path:?}");
            let abs = self.abs_path(path);
            let existing = self.stat(path).await.ok();
            if let Some(fi) = &existing {
                if fi.is_dir {
                    return Err(FsError::IsCollection);
                }
            }
            conditions.check(existing.as_ref().map(|fi| fi.etag.as_str()))?;
            self.check_parent(path).await?;

            let mut opt = tokio::fs::OpenOptions::new();
            opt.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                opt.mode(if self.public { 0o644 } else { 0o600 });
            }
            let mut file = opt.open(&abs).await?;

            let mut write_err = None;
            while let Some(chunk) = body.next().await {
                let res = match chunk {
                    Ok(b) => file.write_all(&b).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = res {
                    write_err = Some(e);
                    break;
                }
            }
            if write_err.is_none() {
                if let Err(e) = file.flush().await {
                    write_err = Some(e);
                }
            }
            drop(file);
            if let Some(e) = write_err {
                let _ = tokio::fs::remove_file(&abs).await;
                return Err(e.into());
            }

            let fi = self.stat_abs(path.as_str().to_string(), &abs).await?;
            Ok((fi, existing.is_none()))
        }
        .boxed()
    }

    fn remove_all<'a>(
        &'a self,
        path: &'a DavPath,
        conditions: &'a Conditions,
    ) -> FsFuture<'a, ()> {
        async move {
            trace!("FS: remove_all {path:?}");
            let fi = self.stat(path).await?;
            conditions.check(Some(&fi.etag))?;
            self.remove_tree(&self.abs_path(path)).await
        }
        .boxed()
    }

    fn mkdir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            trace!("FS: mkdir {path:?}");
            let abs = self.abs_path(path);
            if tokio::fs::metadata(&abs).await.is_ok() {
                return Err(FsError::Exists);
            }
            self.check_parent(path).await?;
            let mut dir = tokio::fs::DirBuilder::new();
            #[cfg(unix)]
            {
                use std::os::unix::fs::DirBuilderExt;
                dir.mode(if self.public { 0o755 } else { 0o700 });
            }
            Ok(dir.create(abs).await?)
        }
        .boxed()
    }

    fn copy<'a>(
        &'a self,
        src: &'a DavPath,
        dst: &'a DavPath,
        options: CopyOptions,
    ) -> FsFuture<'a, bool> {
        async move {
            trace!("FS: copy {src:?} {dst:?}");
            let abs_src = self.abs_path(src);
            let abs_dst = self.abs_path(dst);
            let src_meta = tokio::fs::metadata(&abs_src).await?;
            self.check_parent(dst).await?;

            let created = match tokio::fs::metadata(&abs_dst).await {
                Ok(_) => {
                    if options.no_overwrite {
                        return Err(FsError::Exists);
                    }
                    self.remove_tree(&abs_dst).await?;
                    false
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
                Err(e) => return Err(e.into()),
            };

            if src_meta.is_dir() {
                self.mkdir_with_mode(&abs_dst, &src_meta).await?;
                if !options.no_recursive {
                    self.copy_tree(&abs_src, &abs_dst).await?;
                }
            } else {
                self.copy_file(&abs_src, &abs_dst).await?;
            }
            Ok(created)
        }
        .boxed()
    }

    fn move_all<'a>(
        &'a self,
        src: &'a DavPath,
        dst: &'a DavPath,
        options: MoveOptions,
    ) -> FsFuture<'a, bool> {
        async move {
            trace!("FS: move_all {src:?} {dst:?}");
            let abs_src = self.abs_path(src);
            let abs_dst = self.abs_path(dst);
            tokio::fs::metadata(&abs_src).await?;
            self.check_parent(dst).await?;

            let created = match tokio::fs::metadata(&abs_dst).await {
                Ok(_) => {
                    if options.no_overwrite {
                        return Err(FsError::Exists);
                    }
                    self.remove_tree(&abs_dst).await?;
                    false
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
                Err(e) => return Err(e.into()),
            };

            match tokio::fs::rename(&abs_src, &abs_dst).await {
                Ok(()) => Ok(created),
                Err(e) => {
                    // Cross-device renames fail with EXDEV; fall back to
                    // copy plus delete.
                    debug!("rename {abs_src:?} {abs_dst:?} failed ({e}), copying");
                    self.copy(
                        src,
                        dst,
                        CopyOptions {
                            no_overwrite: false,
                            no_recursive: false,
                        },
                    )
                    .await?;
                    if let Err(e) = self.remove_tree(&abs_src).await {
                        // The move must not leave both trees behind.
                        let _ = tokio::fs::remove_dir_all(&abs_dst).await;
                        let _ = tokio::fs::remove_file(&abs_dst).await;
                        return Err(e);
                    }
                    Ok(created)
                }
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;

    fn body_from(s: &'static str) -> FsBody {
        Box::pin(futures_util::stream::once(async move {
            Ok(Bytes::from_static(s.as_bytes()))
        }))
    }

    async fn read_all(fs: &LocalFs, path: &DavPath) -> Vec<u8> {
        let stream = fs.open(path).await.unwrap();
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn create_stat_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFs::new(dir.path(), false);
        let path = DavPath::new("/file.txt").unwrap();

        let (fi, created) = fs
            .create(&path, body_from("hello"), &Conditions::default())
            .await
            .unwrap();
        assert!(created);
        assert_eq!(fi.size, 5);
        assert_eq!(fi.etag, fs.stat(&path).await.unwrap().etag);
        assert_eq!(read_all(&fs, &path).await, b"hello");

        let (_, created) = fs
            .create(&path, body_from("other"), &Conditions::default())
            .await
            .unwrap();
        assert!(!created);
    }

    #[tokio::test]
    async fn create_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFs::new(dir.path(), false);
        let path = DavPath::new("/no/such/file").unwrap();
        let err = fs
            .create(&path, body_from("x"), &Conditions::default())
            .await
            .unwrap_err();
        assert_eq!(err, FsError::ParentNotFound);
    }

    #[tokio::test]
    async fn conditions_checked_before_write() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFs::new(dir.path(), false);
        let path = DavPath::new("/f").unwrap();
        fs.create(&path, body_from("1"), &Conditions::default())
            .await
            .unwrap();

        let cond = Conditions {
            if_match: Some(crate::davheaders::ETagList::Tags(vec![
                crate::davheaders::ETag::strong("wrong"),
            ])),
            if_none_match: None,
        };
        let err = fs.create(&path, body_from("2"), &cond).await.unwrap_err();
        assert_eq!(err, FsError::Exists);
        assert_eq!(read_all(&fs, &path).await, b"1");
    }

    #[tokio::test]
    async fn copy_and_move_tree() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFs::new(dir.path(), false);
        fs.mkdir(&DavPath::new("/d").unwrap()).await.unwrap();
        fs.create(
            &DavPath::new("/d/f").unwrap(),
            body_from("data"),
            &Conditions::default(),
        )
        .await
        .unwrap();

        let created = fs
            .copy(
                &DavPath::new("/d").unwrap(),
                &DavPath::new("/e").unwrap(),
                CopyOptions::default(),
            )
            .await
            .unwrap();
        assert!(created);
        assert_eq!(read_all(&fs, &DavPath::new("/e/f").unwrap()).await, b"data");

        // overwrite forbidden
        let err = fs
            .copy(
                &DavPath::new("/d").unwrap(),
                &DavPath::new("/e").unwrap(),
                CopyOptions {
                    no_overwrite: true,
                    no_recursive: false,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, FsError::Exists);

        let created = fs
            .move_all(
                &DavPath::new("/d").unwrap(),
                &DavPath::new("/m").unwrap(),
                MoveOptions::default(),
            )
            .await
            .unwrap();
        assert!(created);
        assert_eq!(fs.stat(&DavPath::new("/d").unwrap()).await.unwrap_err(), FsError::NotFound);
        assert_eq!(read_all(&fs, &DavPath::new("/m/f").unwrap()).await, b"data");
    }

    #[tokio::test]
    async fn read_dir_depths() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFs::new(dir.path(), false);
        fs.mkdir(&DavPath::new("/d").unwrap()).await.unwrap();
        fs.mkdir(&DavPath::new("/d/sub").unwrap()).await.unwrap();
        fs.create(
            &DavPath::new("/d/sub/f").unwrap(),
            body_from("x"),
            &Conditions::default(),
        )
        .await
        .unwrap();

        let one: Vec<FileInfo> = fs
            .read_dir(&DavPath::new("/d").unwrap(), false)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let mut paths: Vec<&str> = one.iter().map(|fi| fi.path.as_str()).collect();
        paths.sort();
        assert_eq!(paths, vec!["/d", "/d/sub"]);

        let all: Vec<FileInfo> = fs
            .read_dir(&DavPath::new("/d").unwrap(), true)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let mut paths: Vec<&str> = all.iter().map(|fi| fi.path.as_str()).collect();
        paths.sort();
        assert_eq!(paths, vec!["/d", "/d/sub", "/d/sub/f"]);
    }
}
