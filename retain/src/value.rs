use std::{borrow::Cow, fmt::Debug, ops::Deref, sync::Arc};

use anyhow::{Context, anyhow, bail};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    base::debug,
    codec,
    owner::{Owner, OwnerId},
    registry::Model,
    session::Session,
};

/// Closed set of codecs; the kind is fixed by the value type at declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Scalar,
    TextBlob,
    Reference,
    ReferenceList,
    Structural,
}

/// A type an accessor can hold and the store can carry as text.
pub trait Value: Clone + Send + Sync + 'static {
    const KIND: ValueKind;

    /// Goes into store keys, so it must not contain `:`.
    fn type_tag() -> Cow<'static, str>;

    fn encode(&self) -> anyhow::Result<String>;

    /// References resolve through the session's identity cache and directory.
    fn decode(payload: &str, session: &Session) -> anyhow::Result<Self>;
}

/// Text blob, stored verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Text(pub String);

/// Structural fallback for anything serde can carry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Json<T>(pub T);

/// Reference to another identity-bearing owner.
pub struct Ref<M: Model>(pub Arc<Owner<M>>);

// Implementations

impl ValueKind {
    pub fn codec_tag(self) -> &'static str {
        match self {
            ValueKind::Scalar => "scalar",
            ValueKind::TextBlob => "text",
            ValueKind::Reference => "ref",
            ValueKind::ReferenceList => "reflist",
            ValueKind::Structural => "struct",
        }
    }
}

macro_rules! impl_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Value for $ty {
                const KIND: ValueKind = ValueKind::Scalar;

                fn type_tag() -> Cow<'static, str> {
                    Cow::Borrowed(stringify!($ty))
                }

                fn encode(&self) -> anyhow::Result<String> {
                    Ok(self.to_string())
                }

                fn decode(payload: &str, _: &Session) -> anyhow::Result<Self> {
                    payload
                        .trim()
                        .parse()
                        .with_context(|| format!("`{payload}` is not a valid {}", stringify!($ty)))
                }
            }
        )*
    };
}

impl_scalar!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl Value for bool {
    const KIND: ValueKind = ValueKind::Scalar;

    fn type_tag() -> Cow<'static, str> {
        Cow::Borrowed("bool")
    }

    fn encode(&self) -> anyhow::Result<String> {
        Ok(if *self { "1" } else { "0" }.to_owned())
    }

    fn decode(payload: &str, _: &Session) -> anyhow::Result<Self> {
        let payload = payload.trim();

        Ok(payload == "1" || payload.eq_ignore_ascii_case("true"))
    }
}

impl Value for String {
    const KIND: ValueKind = ValueKind::Scalar;

    fn type_tag() -> Cow<'static, str> {
        Cow::Borrowed("string")
    }

    fn encode(&self) -> anyhow::Result<String> {
        Ok(self.clone())
    }

    fn decode(payload: &str, _: &Session) -> anyhow::Result<Self> {
        Ok(payload.to_owned())
    }
}

impl From<&str> for Text {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl Deref for Text {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Value for Text {
    const KIND: ValueKind = ValueKind::TextBlob;

    fn type_tag() -> Cow<'static, str> {
        Cow::Borrowed("text")
    }

    fn encode(&self) -> anyhow::Result<String> {
        Ok(self.0.clone())
    }

    fn decode(payload: &str, _: &Session) -> anyhow::Result<Self> {
        Ok(Self(payload.to_owned()))
    }
}

impl<T> Value for Json<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    const KIND: ValueKind = ValueKind::Structural;

    fn type_tag() -> Cow<'static, str> {
        Cow::Borrowed("json")
    }

    fn encode(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    fn decode(payload: &str, _: &Session) -> anyhow::Result<Self> {
        Ok(Self(serde_json::from_str(payload)?))
    }
}

impl<M: Model> Ref<M> {
    pub fn owner(&self) -> &Arc<Owner<M>> {
        &self.0
    }

    fn host_id(&self) -> anyhow::Result<&str> {
        match self.0.id() {
            OwnerId::Host(id) => Ok(id.as_str()),
            OwnerId::Synthetic(n) => {
                bail!("detached owner {}#{n} cannot be referenced", M::TYPE_TAG)
            }
        }
    }

    fn resolve(tag: &str, id: &str, session: &Session) -> anyhow::Result<Option<Self>> {
        if tag != M::TYPE_TAG {
            bail!("reference to `{tag}` where `{}` was expected", M::TYPE_TAG);
        }

        Ok(session.lookup::<M>(id)?.map(Ref))
    }
}

impl<M: Model> Clone for Ref<M> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<M: Model> PartialEq for Ref<M> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<M: Model> Eq for Ref<M> {}

impl<M: Model> Debug for Ref<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ref({})", self.0.uid())
    }
}

impl<M: Model> From<Arc<Owner<M>>> for Ref<M> {
    fn from(owner: Arc<Owner<M>>) -> Self {
        Self(owner)
    }
}

impl<M: Model> Value for Ref<M> {
    const KIND: ValueKind = ValueKind::Reference;

    fn type_tag() -> Cow<'static, str> {
        Cow::Owned(format!("ref<{}>", M::TYPE_TAG))
    }

    fn encode(&self) -> anyhow::Result<String> {
        Ok(codec::encode_ref(M::TYPE_TAG, self.host_id()?))
    }

    fn decode(payload: &str, session: &Session) -> anyhow::Result<Self> {
        let (tag, id) = codec::decode_ref(payload)?;

        Self::resolve(tag, &id, session)?
            .ok_or_else(|| anyhow!("reference `{}:{id}` no longer resolves", M::TYPE_TAG))
    }
}

/// A reference that may dangle; an id that no longer resolves reads as `None`.
impl<M: Model> Value for Option<Ref<M>> {
    const KIND: ValueKind = ValueKind::Reference;

    fn type_tag() -> Cow<'static, str> {
        Ref::<M>::type_tag()
    }

    fn encode(&self) -> anyhow::Result<String> {
        match self {
            Some(reference) => reference.encode(),
            None => Ok(String::new()),
        }
    }

    fn decode(payload: &str, session: &Session) -> anyhow::Result<Self> {
        if payload.is_empty() {
            return Ok(None);
        }

        let (tag, id) = codec::decode_ref(payload)?;
        let resolved = Ref::<M>::resolve(tag, &id, session)?;
        if resolved.is_none() {
            debug!(owner = M::TYPE_TAG, id = %id, "dangling reference decoded as none");
        }

        Ok(resolved)
    }
}

impl<M: Model> Value for Vec<Ref<M>> {
    const KIND: ValueKind = ValueKind::ReferenceList;

    fn type_tag() -> Cow<'static, str> {
        Cow::Owned(format!("list<{}>", M::TYPE_TAG))
    }

    fn encode(&self) -> anyhow::Result<String> {
        let ids = self
            .iter()
            .map(Ref::host_id)
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(codec::encode_ref_list(M::TYPE_TAG, ids))
    }

    fn decode(payload: &str, session: &Session) -> anyhow::Result<Self> {
        let (tag, ids) = codec::decode_ref_list(payload)?;

        let mut refs = Vec::with_capacity(ids.len());
        for id in ids {
            match Ref::<M>::resolve(tag, &id, session)? {
                Some(reference) => refs.push(reference),
                None => debug!(owner = M::TYPE_TAG, id = %id, "dropping unresolved list member"),
            }
        }

        Ok(refs)
    }
}
