//! Identifier newtypes.
//!
//! Every id in the review cycle is a plain integer in storage. Wrapping them
//! keeps a reviewer id from being passed where a question id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

id_newtype!(
    /// Id of the review container that scopes questions, forms and allocations.
    ReviewObjId
);
id_newtype!(
    /// Id of a user, either as an author or as a reviewer.
    UserId
);
id_newtype!(
    /// Id of a question taking part in the review cycle.
    QuestionId
);
id_newtype!(
    /// Id of a review form.
    FormId
);
id_newtype!(
    /// Number of a review phase within a container.
    PhaseNr
);
