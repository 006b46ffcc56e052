use std::{collections::BTreeMap, fs};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    base::{debug, error, info, warn},
    config::AdapterConfig,
    session::Session,
    slot::SaveSlot,
    store::{ApplyReport, FlushReport},
};

const DOCUMENT_VERSION: &str = "2";
const TEXT_ELEMENT: &str = "Entry";
const TEXT_FORMAT: &str = "text";

/// Bridges a session and the host's save slot: one versioned document holding
/// every tracked owner's fragment plus the store entries.
#[derive(Debug, Clone, Default)]
pub struct SaveLoadAdapter {
    config: AdapterConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub flush: FlushReport,
    pub owners: usize,
    pub entries: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub owners: usize,
    pub attributes: usize,
    pub entries: usize,
    pub legacy: bool,
    pub eager: Option<ApplyReport>,
    pub lazy: Option<ApplyReport>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompleteReport {
    pub eager: Option<ApplyReport>,
    pub lazy: Option<ApplyReport>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    root: String,
    v: String,
    #[serde(default)]
    owners: Vec<OwnerElement>,
    #[serde(default)]
    store: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OwnerElement {
    element: String,
    uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    body: JsonValue,
}

// Implementations

impl SaveLoadAdapter {
    pub fn new(config: AdapterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn save(&self, session: &Session, slot: &dyn SaveSlot) -> anyhow::Result<SaveReport> {
        let flush = session.flush();

        let mut owners = Vec::new();
        for owner in session.tracked_owners() {
            let fragment = owner.serialize();
            if fragment.is_empty() {
                continue;
            }

            let element = match serde_json::from_str::<JsonValue>(&fragment) {
                Ok(body @ JsonValue::Object(_)) => OwnerElement {
                    element: owner.type_tag().to_owned(),
                    uid: owner.uid(),
                    format: None,
                    body,
                },
                _ => OwnerElement {
                    element: TEXT_ELEMENT.to_owned(),
                    uid: owner.uid(),
                    format: Some(TEXT_FORMAT.to_owned()),
                    body: JsonValue::String(fragment),
                },
            };
            owners.push(element);
        }

        let document = Document {
            root: self.config.root.clone(),
            v: DOCUMENT_VERSION.to_owned(),
            owners,
            store: session.store().entries(),
        };

        let report = SaveReport {
            flush,
            owners: document.owners.len(),
            entries: document.store.len(),
        };

        let blob = serde_json::to_string(&document).context("failed to render save document")?;
        slot.write(&self.config.save_key, &blob)
            .with_context(|| format!("failed to write save slot `{}`", self.config.save_key))?;

        if let Some(path) = &self.config.dump_path {
            let dumped = serde_json::to_string_pretty(&document)
                .map_err(anyhow::Error::from)
                .and_then(|pretty| Ok(fs::write(path, pretty)?));
            if let Err(err) = dumped {
                warn!(path = %path.display(), %err, "failed to write debug dump");
            }
        }

        info!(
            owners = report.owners,
            entries = report.entries,
            written = report.flush.written,
            "saved session"
        );
        Ok(report)
    }

    /// Garbage documents are logged and leave the session untouched; slot I/O
    /// errors are returned.
    pub fn load(&self, session: &Session, slot: &dyn SaveSlot) -> anyhow::Result<LoadReport> {
        let Some(blob) = slot
            .read(&self.config.save_key)
            .with_context(|| format!("failed to read save slot `{}`", self.config.save_key))?
        else {
            debug!(key = %self.config.save_key, "nothing saved");
            return Ok(LoadReport::default());
        };

        if blob.trim().is_empty() {
            return Ok(LoadReport::default());
        }

        let mut report = match serde_json::from_str::<Document>(&blob) {
            Ok(document) if document.root == self.config.root && document.v == DOCUMENT_VERSION => {
                self.apply_document(session, document)
            }
            Ok(document) => {
                error!(
                    root = %document.root,
                    version = %document.v,
                    "save document of another root or version"
                );
                return Ok(LoadReport::default());
            }
            Err(_) => match serde_json::from_str::<BTreeMap<String, JsonValue>>(&blob) {
                Ok(legacy) => self.apply_legacy(session, legacy),
                Err(err) => {
                    error!(key = %self.config.save_key, %err, "unrecognized save document");
                    return Ok(LoadReport::default());
                }
            },
        };

        if self.config.eager_on_load {
            report.eager = Some(session.apply_loaded_eager());
        }
        if self.config.lazy_on_load {
            report.lazy = Some(session.apply_loaded());
        }

        info!(
            owners = report.owners,
            attributes = report.attributes,
            entries = report.entries,
            legacy = report.legacy,
            "loaded session"
        );
        Ok(report)
    }

    /// Eager pass followed by the lazy safety net.
    pub fn complete_load(&self, session: &Session) -> CompleteReport {
        CompleteReport {
            eager: Some(session.apply_loaded_eager()),
            lazy: Some(session.apply_loaded()),
        }
    }

    fn apply_document(&self, session: &Session, document: Document) -> LoadReport {
        let mut report = LoadReport {
            entries: document.store.len(),
            ..Default::default()
        };

        session.store().attach(document.store);

        for element in document.owners {
            let fragment = match (element.format.as_deref(), element.body) {
                (Some(TEXT_FORMAT), JsonValue::String(text)) => text,
                (None, body @ JsonValue::Object(_)) => body.to_string(),
                (format, _) => {
                    warn!(uid = %element.uid, format = ?format, "unsupported owner element");
                    continue;
                }
            };

            report.attributes +=
                apply_fragment(session, &element.uid, &fragment, &mut report.owners);
        }

        report
    }

    fn apply_legacy(&self, session: &Session, legacy: BTreeMap<String, JsonValue>) -> LoadReport {
        info!(owners = legacy.len(), "loading legacy save document");

        let mut report = LoadReport {
            legacy: true,
            ..Default::default()
        };

        for (uid, body) in legacy {
            let fragment = match body {
                JsonValue::String(text) => text,
                body @ JsonValue::Object(_) => body.to_string(),
                _ => {
                    debug!(uid = %uid, "skipping legacy entry");
                    continue;
                }
            };

            report.attributes += apply_fragment(session, &uid, &fragment, &mut report.owners);
        }

        report
    }
}

fn apply_fragment(session: &Session, uid: &str, fragment: &str, owners: &mut usize) -> usize {
    let Some(owner) = session.lookup_uid(uid) else {
        debug!(uid, "owner not found");
        return 0;
    };

    *owners += 1;
    owner.deserialize(fragment)
}
