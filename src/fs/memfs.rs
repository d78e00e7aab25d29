//! Ephemeral in-memory backend.
//!
//! Keeps the whole tree in a `BTreeMap` keyed by normalized path, so
//! subtree operations are simple range scans. Useful for tests and for
//! serving scratch space.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use futures_util::{FutureExt, StreamExt};
use parking_lot::RwLock;

use crate::davpath::DavPath;
use crate::fs::*;

/// In-memory filesystem.
pub struct MemFs {
    tree: Arc<RwLock<BTreeMap<String, MemNode>>>,
}

#[derive(Clone)]
struct MemNode {
    is_dir: bool,
    data: Bytes,
    modified: SystemTime,
}

impl MemNode {
    fn dir() -> MemNode {
        MemNode {
            is_dir: true,
            data: Bytes::new(),
            modified: SystemTime::now(),
        }
    }

    fn file(data: Bytes) -> MemNode {
        MemNode {
            is_dir: false,
            data,
            modified: SystemTime::now(),
        }
    }

    fn file_info(&self, path: String) -> FileInfo {
        let size = if self.is_dir { 0 } else { self.data.len() as u64 };
        let mime_type = if self.is_dir {
            None
        } else {
            mime_guess::from_path(&path)
                .first()
                .map(|m| m.essence_str().to_string())
        };
        FileInfo {
            etag: FileInfo::make_etag(self.modified, size),
            path,
            size,
            modified: self.modified,
            is_dir: self.is_dir,
            mime_type,
        }
    }
}

// The key range holding the members of a collection.
fn subtree_prefix(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{path}/")
    }
}

impl MemFs {
    pub fn new() -> Arc<MemFs> {
        let mut tree = BTreeMap::new();
        tree.insert("/".to_string(), MemNode::dir());
        Arc::new(MemFs {
            tree: Arc::new(RwLock::new(tree)),
        })
    }

    fn parent_is_dir(tree: &BTreeMap<String, MemNode>, path: &DavPath) -> bool {
        tree.get(path.parent().as_str())
            .map(|n| n.is_dir)
            .unwrap_or(false)
    }

    fn remove_subtree(tree: &mut BTreeMap<String, MemNode>, path: &str) {
        let prefix = subtree_prefix(path);
        let victims: Vec<String> = tree
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| k.as_str() != "/")
            .map(|(k, _)| k.clone())
            .collect();
        for k in victims {
            tree.remove(&k);
        }
        // the root collection itself is never removed.
        if path != "/" {
            tree.remove(path);
        }
    }

    fn clone_subtree(
        tree: &BTreeMap<String, MemNode>,
        path: &str,
    ) -> Vec<(String, MemNode)> {
        let prefix = subtree_prefix(path);
        tree.range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, n)| (k.clone(), n.clone()))
            .collect()
    }
}

impl DavFileSystem for MemFs {
    fn stat<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, FileInfo> {
        async move {
            let tree = self.tree.read();
            let node = tree.get(path.as_str()).ok_or(FsError::NotFound)?;
            Ok(node.file_info(path.as_str().to_string()))
        }
        .boxed()
    }

    fn open<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, FsStream<Bytes>> {
        async move {
            let tree = self.tree.read();
            let node = tree.get(path.as_str()).ok_or(FsError::NotFound)?;
            if node.is_dir {
                return Err(FsError::IsCollection);
            }
            let data = node.data.clone();
            Ok(Box::pin(futures_util::stream::once(async move { Ok(data) }))
                as FsStream<Bytes>)
        }
        .boxed()
    }

    fn read_dir<'a>(
        &'a self,
        path: &'a DavPath,
        recursive: bool,
    ) -> FsFuture<'a, FsStream<FileInfo>> {
        async move {
            let tree = self.tree.read();
            let root = tree.get(path.as_str()).ok_or(FsError::NotFound)?;
            if !root.is_dir {
                return Err(FsError::NotFound);
            }
            let mut entries = vec![root.file_info(path.as_str().to_string())];
            let prefix = subtree_prefix(path.as_str());
            for (k, n) in tree
                .range(prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&prefix))
            {
                // the root entry was already emitted.
                if k.as_str() == path.as_str() {
                    continue;
                }
                if !recursive && k[prefix.len()..].contains('/') {
                    continue;
                }
                entries.push(n.file_info(k.clone()));
            }
            Ok(
                Box::pin(futures_util::stream::iter(entries.into_iter().map(Ok)))
                    as FsStream<FileInfo>,
            )
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
            // Preconditions are checked against the state before the
            // body is consumed.
            {
                let tree = self.tree.read();
                let existing = tree.get(path.as_str());
                if existing.map(|n| n.is_dir).unwrap_or(false) {
                    return Err(FsError::IsCollection);
                }
                let etag = existing.map(|n| {
                    FileInfo::make_etag(n.modified, n.data.len() as u64)
                });
                conditions.check(etag.as_deref())?;
                if !Self::parent_is_dir(&tree, path) {
                    return Err(FsError::ParentNotFound);
                }
            }

            let mut data = Vec::new();
            while let Some(chunk) = body.next().await {
                data.extend_from_slice(&chunk?);
            }

            let mut tree = self.tree.write();
            if !Self::parent_is_dir(&tree, path) {
                return Err(FsError::ParentNotFound);
            }
            let created = !tree.contains_key(path.as_str());
            let node = MemNode::file(Bytes::from(data));
            let fi = node.file_info(path.as_str().to_string());
            tree.insert(path.as_str().to_string(), node);
            Ok((fi, created))
        }
        .boxed()
    }

    fn remove_all<'a>(
        &'a self,
        path: &'a DavPath,
        conditions: &'a Conditions,
    ) -> FsFuture<'a, ()> {
        async move {
            let mut tree = self.tree.write();
            let node = tree.get(path.as_str()).ok_or(FsError::NotFound)?;
            let etag = FileInfo::make_etag(node.modified, node.data.len() as u64);
            conditions.check(Some(&etag))?;
            Self::remove_subtree(&mut tree, path.as_str());
            Ok(())
        }
        .boxed()
    }

    fn mkdir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            let mut tree = self.tree.write();
            if tree.contains_key(path.as_str()) {
                return Err(FsError::Exists);
            }
            if !Self::parent_is_dir(&tree, path) {
                return Err(FsError::ParentNotFound);
            }
            tree.insert(path.as_str().to_string(), MemNode::dir());
            Ok(())
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
            let mut tree = self.tree.write();
            let src_node = tree.get(src.as_str()).cloned().ok_or(FsError::NotFound)?;
            if !Self::parent_is_dir(&tree, dst) {
                return Err(FsError::ParentNotFound);
            }
            let created = !tree.contains_key(dst.as_str());
            if !created {
                if options.no_overwrite {
                    return Err(FsError::Exists);
                }
                Self::remove_subtree(&mut tree, dst.as_str());
            }

            let members = if src_node.is_dir && !options.no_recursive {
                Self::clone_subtree(&tree, src.as_str())
            } else {
                Vec::new()
            };
            tree.insert(dst.as_str().to_string(), src_node);
            let src_prefix = subtree_prefix(src.as_str());
            let dst_prefix = subtree_prefix(dst.as_str());
            for (k, n) in members {
                let rel = &k[src_prefix.len()..];
                tree.insert(format!("{dst_prefix}{rel}"), n);
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
            let mut tree = self.tree.write();
            let src_node = tree.get(src.as_str()).cloned().ok_or(FsError::NotFound)?;
            if !Self::parent_is_dir(&tree, dst) {
                return Err(FsError::ParentNotFound);
            }
            let created = !tree.contains_key(dst.as_str());
            if !created {
                if options.no_overwrite {
                    return Err(FsError::Exists);
                }
                Self::remove_subtree(&mut tree, dst.as_str());
            }

            let members = Self::clone_subtree(&tree, src.as_str());
            Self::remove_subtree(&mut tree, src.as_str());
            tree.insert(dst.as_str().to_string(), src_node);
            let src_prefix = subtree_prefix(src.as_str());
            let dst_prefix = subtree_prefix(dst.as_str());
            for (k, n) in members {
                let rel = &k[src_prefix.len()..];
                tree.insert(format!("{dst_prefix}{rel}"), n);
            }
            Ok(created)
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

    fn p(s: &str) -> DavPath {
        DavPath::new(s).unwrap()
    }

    async fn read_all(fs: &MemFs, path: &DavPath) -> Vec<u8> {
        let stream = fs.open(path).await.unwrap();
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn put_then_get() {
        let fs = MemFs::new();
        let (fi, created) = fs
            .create(&p("/a.txt"), body_from("hello"), &Conditions::default())
            .await
            .unwrap();
        assert!(created);
        assert_eq!(read_all(&fs, &p("/a.txt")).await, b"hello");
        assert_eq!(fs.stat(&p("/a.txt")).await.unwrap().etag, fi.etag);
    }

    #[tokio::test]
    async fn mkdir_semantics() {
        let fs = MemFs::new();
        fs.mkdir(&p("/d")).await.unwrap();
        assert_eq!(fs.mkdir(&p("/d")).await.unwrap_err(), FsError::Exists);
        assert_eq!(
            fs.mkdir(&p("/x/y")).await.unwrap_err(),
            FsError::ParentNotFound
        );
    }

    #[tokio::test]
    async fn remove_missing_is_not_found() {
        let fs = MemFs::new();
        assert_eq!(
            fs.remove_all(&p("/gone"), &Conditions::default())
                .await
                .unwrap_err(),
            FsError::NotFound
        );
    }

    #[tokio::test]
    async fn copy_then_delete_equals_move() {
        let fs = MemFs::new();
        fs.mkdir(&p("/d")).await.unwrap();
        fs.create(&p("/d/f"), body_from("1"), &Conditions::default())
            .await
            .unwrap();

        fs.copy(&p("/d"), &p("/c"), CopyOptions::default())
            .await
            .unwrap();
        fs.remove_all(&p("/d"), &Conditions::default())
            .await
            .unwrap();

        let fs2 = MemFs::new();
        fs2.mkdir(&p("/d")).await.unwrap();
        fs2.create(&p("/d/f"), body_from("1"), &Conditions::default())
            .await
            .unwrap();
        fs2.move_all(&p("/d"), &p("/c"), MoveOptions::default())
            .await
            .unwrap();

        for fsx in [&fs, &fs2] {
            assert!(fsx.stat(&p("/d")).await.is_err());
            assert_eq!(read_all(fsx, &p("/c/f")).await, b"1");
        }
    }

    #[tokio::test]
    async fn overwrite_rules() {
        let fs = MemFs::new();
        fs.create(&p("/src"), body_from("s"), &Conditions::default())
            .await
            .unwrap();
        fs.create(&p("/dst"), body_from("d"), &Conditions::default())
            .await
            .unwrap();

        let err = fs
            .copy(
                &p("/src"),
                &p("/dst"),
                CopyOptions {
                    no_overwrite: true,
                    no_recursive: false,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, FsError::Exists);

        let created = fs
            .copy(&p("/src"), &p("/dst"), CopyOptions::default())
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(read_all(&fs, &p("/dst")).await, b"s");
    }

    #[tokio::test]
    async fn read_dir_immediate_and_recursive() {
        let fs = MemFs::new();
        fs.mkdir(&p("/d")).await.unwrap();
        fs.mkdir(&p("/d/sub")).await.unwrap();
        fs.create(&p("/d/sub/f"), body_from("x"), &Conditions::default())
            .await
            .unwrap();

        let one: Vec<FileInfo> = fs
            .read_dir(&p("/d"), false)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(
            one.iter().map(|fi| fi.path.as_str()).collect::<Vec<_>>(),
            vec!["/d", "/d/sub"]
        );

        let all: Vec<FileInfo> = fs
            .read_dir(&p("/d"), true)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(
            all.iter().map(|fi| fi.path.as_str()).collect::<Vec<_>>(),
            vec!["/d", "/d/sub", "/d/sub/f"]
        );
    }
}
