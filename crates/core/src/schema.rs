//! Field schema reflection.
//!
//! A [`SubrecordSchema`] is built once per subrecord kind at registration
//! time and answers every shape question the engine has: which fields exist,
//! which names a payload may use, which fields are serialised, which are
//! excluded from de-identified extraction, and what the client-facing form
//! schema looks like.
//!
//! Coded (reference-or-free-text) fields contribute one logical name even
//! though they are backed by the two physical attributes `<name>_fk` and
//! `<name>_ft`. The physical names never appear in serialised output or form
//! schemas; they remain *known* names only so the codec can accept legacy
//! payloads that still carry them.

use ward_types::ApiName;

use crate::error::{RecordError, RecordResult};
use crate::fields::{FieldKind, FieldSpec, FK_SUFFIX, FT_SUFFIX};

/// The aggregate root family a subrecord kind attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootFamily {
    Patient,
    Episode,
}

impl RootFamily {
    /// Name of the owning-aggregate reference attribute.
    pub fn owner_field(self) -> &'static str {
        match self {
            RootFamily::Patient => "patient_id",
            RootFamily::Episode => "episode_id",
        }
    }
}

/// A client-facing field descriptor, as consumed by form builders.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub title: String,
    #[serde(rename = "type")]
    pub field_type: &'static str,
    pub lookup_list: Option<ApiName>,
}

/// Reflected shape of one subrecord kind.
#[derive(Debug, Clone)]
pub struct SubrecordSchema {
    family: RootFamily,
    /// Every field the engine knows by name, physical and logical, in
    /// declaration order. Coded fields appear as `x_fk`, `x_ft`, then `x`.
    known: Vec<FieldSpec>,
    /// Logical field list: `known` with physical halves folded into their
    /// logical entry.
    serialize: Vec<String>,
    /// `serialize` minus PID fields.
    extract: Vec<String>,
}

/// Fields present on every subrecord kind, in serialisation order.
fn implicit_fields(family: RootFamily) -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("id", FieldKind::Reference),
        FieldSpec::new(family.owner_field(), FieldKind::Reference),
        FieldSpec::new("consistency_token", FieldKind::Text),
        FieldSpec::new("created", FieldKind::DateTime),
        FieldSpec::new("created_by_id", FieldKind::Reference),
        FieldSpec::new("updated", FieldKind::DateTime),
        FieldSpec::new("updated_by_id", FieldKind::Reference),
    ]
}

impl SubrecordSchema {
    /// Reflects the full field list from the declared fields.
    pub fn new(family: RootFamily, declared: Vec<FieldSpec>) -> Self {
        let mut known = implicit_fields(family);
        for spec in declared {
            match &spec.kind {
                FieldKind::CodedText(_) => {
                    // Physical pair first, logical entry after, so the fold
                    // below lands the logical name at the declared slot.
                    let mut fk = FieldSpec::new(
                        format!("{}{}", spec.name, FK_SUFFIX),
                        FieldKind::Reference,
                    );
                    fk.pid = spec.pid;
                    let mut ft =
                        FieldSpec::new(format!("{}{}", spec.name, FT_SUFFIX), FieldKind::Text);
                    ft.pid = spec.pid;
                    known.push(fk);
                    known.push(ft);
                    known.push(spec);
                }
                _ => known.push(spec),
            }
        }

        let names: Vec<&str> = known.iter().map(|f| f.name.as_str()).collect();
        let mut serialize = Vec::new();
        for spec in &known {
            if let Some(base) = spec
                .name
                .strip_suffix(FK_SUFFIX)
                .or_else(|| spec.name.strip_suffix(FT_SUFFIX))
            {
                if names.contains(&base) {
                    continue;
                }
            }
            serialize.push(spec.name.clone());
        }

        let extract = serialize
            .iter()
            .filter(|name| {
                known
                    .iter()
                    .find(|f| &f.name == *name)
                    .map(|f| !f.pid)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        Self {
            family,
            known,
            serialize,
            extract,
        }
    }

    pub fn family(&self) -> RootFamily {
        self.family
    }

    /// Ordered logical field names used for serialisation.
    pub fn serialize_names(&self) -> &[String] {
        &self.serialize
    }

    /// Logical field names minus PID fields, for de-identified extraction.
    pub fn extract_names(&self) -> &[String] {
        &self.extract
    }

    /// Whether `name` is a known field, logical or physical. Used for the
    /// codec's payload presence checks only.
    pub fn is_known(&self, name: &str) -> bool {
        self.known.iter().any(|f| f.name == name)
    }

    /// The declared kind of a field, by logical or physical name.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Schema`] for unrecognised names. This must
    /// never fire for statically declared fields; it signals a registration
    /// bug, not a user error.
    pub fn field_kind(&self, name: &str) -> RecordResult<&FieldKind> {
        self.known
            .iter()
            .find(|f| f.name == name)
            .map(|f| &f.kind)
            .ok_or_else(|| RecordError::Schema(name.to_owned()))
    }

    /// Builds the client-facing form schema.
    ///
    /// Identity and owner references are omitted, physical halves are never
    /// exposed, and the consistency token reports the reserved type
    /// `"token"`.
    pub fn build_field_schema(&self) -> Vec<FieldDescriptor> {
        let owner = self.family.owner_field();
        let mut descriptors = Vec::new();
        for name in &self.serialize {
            if name == "id" || name == owner {
                continue;
            }
            if name == "consistency_token" {
                descriptors.push(FieldDescriptor {
                    name: name.clone(),
                    title: title_for(name),
                    field_type: "token",
                    lookup_list: None,
                });
                continue;
            }
            // serialize_names only yields known names.
            let kind = match self.field_kind(name) {
                Ok(kind) => kind,
                Err(_) => continue,
            };
            descriptors.push(FieldDescriptor {
                name: name.clone(),
                title: title_for(name),
                field_type: kind.schema_type(),
                lookup_list: kind.lookup_list().cloned(),
            });
        }
        descriptors
    }
}

/// Display title for a field name: underscores become spaces, words are
/// title-cased.
fn title_for(name: &str) -> String {
    name.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
