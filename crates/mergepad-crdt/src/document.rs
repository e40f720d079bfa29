//! Loro-backed replica of one document's text.

use std::borrow::Cow;

use loro::{ExportMode, LoroDoc, LoroText, UpdateOptions, VersionVector};
use mergepad_common::EngineConfig;
use smol_str::SmolStr;

use crate::CrdtError;

/// Where a replica keeps its text and how it splices plain-text updates.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentOptions {
    /// Name of the text container inside the loro document.
    pub container: SmolStr,
    /// Timeout for the text diff run by [`ReplicatedDocument::update_from_plain_text`].
    pub update_timeout_ms: Option<f64>,
}

impl Default for DocumentOptions {
    fn default() -> Self {
        Self {
            container: SmolStr::new_static("content"),
            update_timeout_ms: None,
        }
    }
}

impl From<&EngineConfig> for DocumentOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            container: SmolStr::new(&config.text_container),
            update_timeout_ms: config.update_timeout_ms,
        }
    }
}

/// One writer's view of a document: a loro doc plus its flattened text.
///
/// Every instance carries its own peer id, so edits made through different
/// instances merge as concurrent operations. `Clone` forks.
pub struct ReplicatedDocument {
    doc: LoroDoc,
    text: LoroText,
    options: DocumentOptions,
    flattened: String,
}

impl ReplicatedDocument {
    /// Seed a fresh replica whose text is `text`.
    pub fn from_plain_text(options: &DocumentOptions, text: &str) -> Result<Self, CrdtError> {
        let mut document = Self::empty(options);
        if !text.is_empty() {
            document.text.insert(0, text).map_err(|e| CrdtError::Splice {
                document_len: 0,
                target_len: text.len(),
                reason: e.to_string(),
            })?;
            document.doc.commit();
            document.refresh();
        }
        Ok(document)
    }

    /// Rebuild a replica from bytes produced by [`Self::export_snapshot`].
    pub fn from_snapshot(options: &DocumentOptions, snapshot: &[u8]) -> Result<Self, CrdtError> {
        let mut document = Self::empty(options);
        document.doc.import(snapshot)?;
        document.refresh();
        Ok(document)
    }

    fn empty(options: &DocumentOptions) -> Self {
        let doc = LoroDoc::new();
        let text = doc.get_text(options.container.as_str());
        Self {
            doc,
            text,
            options: options.clone(),
            flattened: String::new(),
        }
    }

    /// Full state, suitable for [`Self::from_snapshot`].
    pub fn export_snapshot(&self) -> Result<Vec<u8>, CrdtError> {
        self.doc
            .export(ExportMode::Snapshot)
            .map_err(|e| CrdtError::Export(e.to_string()))
    }

    /// Independent copy with its own peer id.
    pub fn fork(&self) -> Self {
        let doc = self.doc.fork();
        let text = doc.get_text(self.options.container.as_str());
        Self {
            doc,
            text,
            options: self.options.clone(),
            flattened: self.flattened.clone(),
        }
    }

    /// Splice the text so it reads `target`, as a minimal character edit.
    ///
    /// Characters that survive are left untouched, so concurrent edits to them
    /// from other replicas still land after a merge. No-op when the text
    /// already matches.
    pub fn update_from_plain_text(&mut self, target: &str) -> Result<(), CrdtError> {
        if self.flattened == target {
            return Ok(());
        }
        let options = UpdateOptions {
            timeout_ms: self.options.update_timeout_ms,
            ..Default::default()
        };
        self.text
            .update(target, options)
            .map_err(|e| CrdtError::Splice {
                document_len: self.flattened.len(),
                target_len: target.len(),
                reason: format!("{e:?}"),
            })?;
        self.doc.commit();
        self.refresh();
        Ok(())
    }

    /// Operations in `to` that `from` has not seen, or `None` if there are none.
    pub fn diff_delta(
        from: &ReplicatedDocument,
        to: &ReplicatedDocument,
    ) -> Result<Option<Vec<u8>>, CrdtError> {
        to.delta_since(&from.version())
    }

    /// Export updates since given version.
    pub fn delta_since(&self, version: &VersionVector) -> Result<Option<Vec<u8>>, CrdtError> {
        let current = self.version();
        if version.includes_vv(&current) {
            return Ok(None);
        }

        let updates = self
            .doc
            .export(ExportMode::Updates {
                from: Cow::Borrowed(version),
            })
            .map_err(|e| CrdtError::Export(e.to_string()))?;

        if updates.is_empty() {
            return Ok(None);
        }
        Ok(Some(updates))
    }

    /// Merge a delta from another replica. Re-applying one is harmless.
    pub fn apply_delta(&mut self, delta: &[u8]) -> Result<(), CrdtError> {
        self.doc.import(delta)?;
        self.refresh();
        Ok(())
    }

    /// Current text.
    pub fn flatten(&self) -> &str {
        &self.flattened
    }

    pub fn version(&self) -> VersionVector {
        self.doc.oplog_vv()
    }

    pub fn options(&self) -> &DocumentOptions {
        &self.options
    }

    fn refresh(&mut self) {
        self.flattened = self.text.to_string();
    }
}

impl Clone for ReplicatedDocument {
    fn clone(&self) -> Self {
        self.fork()
    }
}

impl std::fmt::Debug for ReplicatedDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatedDocument")
            .field("container", &self.options.container)
            .field("len", &self.flattened.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> ReplicatedDocument {
        ReplicatedDocument::from_plain_text(&DocumentOptions::default(), text).unwrap()
    }

    #[test]
    fn test_plain_text_round_trip() {
        for text in ["", "a", "a\nb\nc\n", "\n\n", "ünïcødé\n→ 🦀"] {
            let mut replica = doc("seed\n");
            replica.update_from_plain_text(text).unwrap();
            assert_eq!(replica.flatten(), text);
        }
        for text in ["", "a", "a\n"] {
            assert_eq!(doc(text).flatten(), text);
        }
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let replica = doc("hello\nworld\n");
        let snapshot = replica.export_snapshot().unwrap();
        let restored =
            ReplicatedDocument::from_snapshot(&DocumentOptions::default(), &snapshot).unwrap();
        assert_eq!(restored.flatten(), "hello\nworld\n");
        assert_eq!(restored.version(), replica.version());
    }

    #[test]
    fn test_fork_is_independent() {
        let original = doc("a\nb\n");
        let mut forked = original.clone();
        forked.update_from_plain_text("a\nB\n").unwrap();
        assert_eq!(original.flatten(), "a\nb\n");
        assert_eq!(forked.flatten(), "a\nB\n");
    }

    #[test]
    fn test_no_delta_without_changes() {
        let base = doc("a\nb\nc\n");
        let mut same = base.fork();
        same.update_from_plain_text("a\nb\nc\n").unwrap();
        assert!(ReplicatedDocument::diff_delta(&base, &same).unwrap().is_none());

        let mut edited = base.fork();
        edited.update_from_plain_text("a\nX\nc\n").unwrap();
        assert!(ReplicatedDocument::diff_delta(&base, &edited).unwrap().is_some());
        // Nothing flows backwards from an older replica.
        assert!(ReplicatedDocument::diff_delta(&edited, &base).unwrap().is_none());
    }

    #[test]
    fn test_concurrent_line_edits_merge() {
        let base = doc("a\nb\nc\n");
        let mut left = base.fork();
        let mut right = base.fork();
        left.update_from_plain_text("A\nb\nc\n").unwrap();
        right.update_from_plain_text("a\nb\nC\n").unwrap();

        let delta = ReplicatedDocument::diff_delta(&base, &right).unwrap().unwrap();
        left.apply_delta(&delta).unwrap();
        assert_eq!(left.flatten(), "A\nb\nC\n");
    }

    #[test]
    fn test_apply_delta_twice() {
        let base = doc("one\ntwo\n");
        let mut edited = base.fork();
        edited.update_from_plain_text("one\ntwo\nthree\n").unwrap();
        let delta = ReplicatedDocument::diff_delta(&base, &edited).unwrap().unwrap();

        let mut target = base.fork();
        target.apply_delta(&delta).unwrap();
        target.apply_delta(&delta).unwrap();
        assert_eq!(target.flatten(), "one\ntwo\nthree\n");
    }

    #[test]
    fn test_custom_container() {
        let options = DocumentOptions {
            container: SmolStr::new_static("body"),
            update_timeout_ms: Some(1_000.0),
        };
        let replica = ReplicatedDocument::from_plain_text(&options, "x\n").unwrap();
        let snapshot = replica.export_snapshot().unwrap();
        let restored = ReplicatedDocument::from_snapshot(&options, &snapshot).unwrap();
        assert_eq!(restored.flatten(), "x\n");

        // A different container name sees nothing.
        let other = ReplicatedDocument::from_snapshot(&DocumentOptions::default(), &snapshot)
            .unwrap();
        assert_eq!(other.flatten(), "");
    }
}
