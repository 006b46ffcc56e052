use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicUsize, Ordering},
    },
};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    accessor::Attribute,
    base::{debug, error, info, locked, trace, warn},
    codec::{Envelope, StoreKey},
    registry::EagerOutcome,
    session::Session,
};

/// `key → packed envelope` map of one session, plus the bookkeeping of which
/// accessors are registered, dirty, or already applied in this load.
#[derive(Default)]
pub struct PersistenceStore {
    state: Mutex<StoreState>,
    applying: AtomicUsize,
}

#[derive(Default)]
struct StoreState {
    entries: FxHashMap<String, String>,
    registered: FxHashMap<String, Weak<dyn Attribute>>,
    // Strong until flushed, so detached owners dropped early still get written.
    // Holds non-persistent accessors too; flush only clears those.
    dirty: FxHashMap<String, Arc<dyn Attribute>>,
    applied: FxHashSet<String>,
}

/// While alive, dirty marking is suppressed. Scopes nest.
pub struct ApplyScope<'a> {
    store: &'a PersistenceStore,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub written: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

// Implementations

impl PersistenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_applying(&self) -> ApplyScope<'_> {
        self.applying.fetch_add(1, Ordering::AcqRel);
        ApplyScope { store: self }
    }

    pub fn is_applying(&self) -> bool {
        self.applying.load(Ordering::Acquire) > 0
    }

    /// Replaces the contents with loaded entries and forgets what was applied.
    pub fn attach(&self, entries: impl IntoIterator<Item = (String, String)>) {
        let mut state = locked(&self.state);
        state.entries = entries.into_iter().collect();
        state.applied.clear();

        debug!(entries = state.entries.len(), "attached store entries");
    }

    pub fn entries(&self) -> BTreeMap<String, String> {
        locked(&self.state)
            .entries
            .iter()
            .map(|(key, packed)| (key.clone(), packed.clone()))
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        locked(&self.state).entries.get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, packed: impl Into<String>) {
        locked(&self.state).entries.insert(key.into(), packed.into());
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        let mut state = locked(&self.state);
        state.applied.remove(key);
        state.entries.remove(key)
    }

    pub fn clear(&self) {
        let mut state = locked(&self.state);
        state.entries.clear();
        state.applied.clear();
        state.dirty.clear();
    }

    pub fn len(&self) -> usize {
        locked(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        locked(&self.state).entries.is_empty()
    }

    pub fn dirty_len(&self) -> usize {
        locked(&self.state).dirty.len()
    }

    pub fn is_applied(&self, key: &str) -> bool {
        locked(&self.state).applied.contains(key)
    }

    /// Accessors still alive and known to the store.
    pub fn registered_len(&self) -> usize {
        locked(&self.state)
            .registered
            .values()
            .filter(|attr| attr.strong_count() > 0)
            .count()
    }

    /// Registers a freshly created accessor. A persistent one also gets a
    /// stored, not yet applied value right away.
    pub(crate) fn register(&self, attr: &Arc<dyn Attribute>, session: Option<&Session>) {
        let pending = {
            let mut state = locked(&self.state);
            state
                .registered
                .insert(attr.key().to_owned(), Arc::downgrade(attr));

            if !attr.is_persistent() {
                None
            } else if state.applied.contains(attr.key()) {
                attr.mark_persisted();
                None
            } else {
                state.entries.get(attr.key()).cloned()
            }
        };

        let (Some(packed), Some(session)) = (pending, session) else {
            return;
        };

        let _scope = self.begin_applying();
        match self.apply_packed(attr.as_ref(), &packed, session) {
            Ok(()) => self.finish_apply(attr.as_ref()),
            Err(err) => {
                warn!(key = attr.key(), %err, "failed to apply stored value on registration")
            }
        }
    }

    pub(crate) fn note_dirty(&self, key: &str) {
        let mut state = locked(&self.state);
        if let Some(attr) = state.registered.get(key).and_then(Weak::upgrade) {
            state.dirty.insert(key.to_owned(), attr);
        }
    }

    /// Encodes every persistent accessor dirtied since the last flush and
    /// clears the rest. Entries are never dropped here; a key once written
    /// stays until removed.
    pub fn flush(&self) -> FlushReport {
        let mut dirty = locked(&self.state).dirty.drain().collect::<Vec<_>>();
        dirty.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut report = FlushReport::default();
        for (key, attr) in dirty {
            if !attr.is_persistent() {
                attr.clear_dirty();
                continue;
            }

            match attr.encode() {
                Ok(payload) => {
                    let packed =
                        Envelope::new(attr.priority(), attr.kind().codec_tag(), payload).pack();
                    locked(&self.state).entries.insert(key, packed);
                    attr.clear_dirty();
                    attr.mark_persisted();
                    report.written += 1;
                }
                Err(err) => {
                    error!(key = %key, %err, "failed to encode attribute");
                    locked(&self.state).dirty.insert(key, attr);
                    report.failed += 1;
                }
            }
        }

        // Accessors of dropped owners.
        locked(&self.state)
            .registered
            .retain(|_, attr| attr.strong_count() > 0);

        trace!(written = report.written, failed = report.failed, "flushed store");
        report
    }

    /// Lazy pass: applies stored entries to the accessors registered for them.
    pub fn apply_loaded(&self, session: &Session) -> ApplyReport {
        let mut pending = {
            let state = locked(&self.state);
            state
                .entries
                .iter()
                .filter(|(key, _)| !state.applied.contains(*key))
                .filter_map(|(key, packed)| {
                    let attr = state.registered.get(key)?.upgrade()?;
                    attr.is_persistent().then(|| (key.clone(), packed.clone(), attr))
                })
                .collect::<Vec<_>>()
        };
        pending.sort_by(|(a_key, _, a), (b_key, _, b)| {
            (a.priority(), a_key).cmp(&(b.priority(), b_key))
        });

        let _scope = self.begin_applying();
        let mut report = ApplyReport::default();
        for (key, packed, attr) in pending {
            match self.apply_packed(attr.as_ref(), &packed, session) {
                Ok(()) => {
                    self.finish_apply(attr.as_ref());
                    report.applied += 1;
                }
                Err(err) => {
                    warn!(key = %key, %err, "failed to apply stored value");
                    report.failed += 1;
                }
            }
        }

        debug!(applied = report.applied, failed = report.failed, "lazy apply finished");
        report
    }

    /// Eager pass: resolves owner type and host from each key and writes
    /// without waiting for an accessor to be created.
    pub fn apply_loaded_eager(&self, session: &Session) -> ApplyReport {
        let mut report = ApplyReport::default();

        let mut pending = Vec::new();
        {
            let state = locked(&self.state);
            for (raw, packed) in &state.entries {
                if state.applied.contains(raw) {
                    continue;
                }
                let Some(key) = StoreKey::parse(raw) else {
                    trace!(key = %raw, "not eagerly resolvable");
                    continue;
                };
                match Envelope::unpack(packed) {
                    Ok(envelope) => pending.push((key, raw.clone(), envelope)),
                    Err(err) => {
                        warn!(key = %raw, %err, "unreadable envelope");
                        report.failed += 1;
                    }
                }
            }
        }
        pending.sort_by(|(a, _, a_env), (b, _, b_env)| {
            (a_env.priority, &a.owner_tag, &a.host_id, &a.attr)
                .cmp(&(b_env.priority, &b.owner_tag, &b.host_id, &b.attr))
        });

        let _scope = self.begin_applying();
        for (key, raw, envelope) in pending {
            let Some(model) = session.models().lookup(&key.owner_tag) else {
                debug!(key = %raw, owner = %key.owner_tag, "unknown owner type");
                report.skipped += 1;
                continue;
            };

            match model.apply_eager(session, &key, &raw, &envelope) {
                Ok(EagerOutcome::Applied) => {
                    let attr = {
                        let mut state = locked(&self.state);
                        state.applied.insert(raw.clone());
                        state.registered.get(&raw).and_then(Weak::upgrade)
                    };
                    if let Some(attr) = attr {
                        attr.mark_persisted();
                    }
                    report.applied += 1;
                }
                Ok(EagerOutcome::Missing) => {
                    debug!(key = %raw, "host not found");
                    report.skipped += 1;
                }
                Ok(EagerOutcome::Mismatch) => {
                    warn!(
                        key = %raw,
                        codec = ?envelope.codec,
                        "stored value does not fit the declaration"
                    );
                    report.skipped += 1;
                }
                Err(err) => {
                    warn!(key = %raw, %err, "failed to apply stored value");
                    report.failed += 1;
                }
            }
        }

        info!(
            applied = report.applied,
            skipped = report.skipped,
            failed = report.failed,
            "eager apply finished"
        );
        report
    }

    /// Envelopes written by another codec are rejected.
    fn apply_packed(
        &self,
        attr: &dyn Attribute,
        packed: &str,
        session: &Session,
    ) -> anyhow::Result<()> {
        let envelope = Envelope::unpack(packed)?;
        if let Some(codec) = envelope.codec.as_deref() {
            let expected = attr.kind().codec_tag();
            if codec != expected {
                anyhow::bail!("stored with codec `{codec}`, expected `{expected}`");
            }
        }

        attr.apply_encoded(&envelope.payload, session)
    }

    fn finish_apply(&self, attr: &dyn Attribute) {
        locked(&self.state).applied.insert(attr.key().to_owned());
        attr.mark_persisted();
    }
}

impl Drop for ApplyScope<'_> {
    fn drop(&mut self) {
        self.store.applying.fetch_sub(1, Ordering::AcqRel);
    }
}
