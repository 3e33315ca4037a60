//! Integer identifier newtypes.
//!
//! Every entity family gets its own id type so that an episode id can never
//! be passed where a team id is expected. Ids are allocated by the store and
//! serialise as plain JSON numbers.

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn value(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> u64 {
                id.0
            }
        }
    };
}

id_type!(
    /// Identifier of a [`Patient`](crate::aggregate::Patient) aggregate root.
    PatientId
);
id_type!(
    /// Identifier of an [`Episode`](crate::aggregate::Episode) aggregate root.
    EpisodeId
);
id_type!(
    /// Identifier of a persisted subrecord instance.
    RecordId
);
id_type!(
    /// Identifier of a [`Tagging`](crate::tagging::Tagging) row.
    TaggingId
);
id_type!(
    /// Identifier of a controlled-vocabulary entry.
    EntryId
);
id_type!(
    /// Identifier of a [`Team`](crate::teams::Team).
    TeamId
);
id_type!(
    /// Identifier of an acting user.
    UserId
);
