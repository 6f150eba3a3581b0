//! The fixed rubrics a review is scored along.
//!
//! Each rubric is a closed set of options with a stable integer code. The code
//! is what gets stored; the label is what a presentation layer shows.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! rubric {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident = $code:literal => $label:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Every option, in presentation order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Storage code of this option.
            pub fn code(self) -> i64 {
                match self {
                    $($name::$variant => $code),+
                }
            }

            /// Option for a storage code, if it is one.
            pub fn from_code(code: i64) -> Option<Self> {
                match code {
                    $($code => Some($name::$variant),)+
                    _ => None,
                }
            }

            pub fn label(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }
    };
}

rubric!(
    /// Cognitive process a question targets (revised Bloom taxonomy).
    Taxonomy {
        Remember = 1 => "Remember",
        Understand = 2 => "Understand",
        Apply = 3 => "Apply",
        Analyze = 4 => "Analyze",
        Evaluate = 5 => "Evaluate",
        Create = 6 => "Create",
    }
);

rubric!(
    /// Kind of knowledge a question targets.
    KnowledgeDimension {
        Factual = 1 => "Factual",
        Conceptual = 2 => "Conceptual",
        Procedural = 3 => "Procedural",
        Metacognitive = 4 => "Metacognitive",
    }
);

rubric!(
    /// Reviewer's self-assessed expertise on the question's subject.
    Expertise {
        Novice = 1 => "Novice",
        Low = 2 => "Low",
        Medium = 3 => "Medium",
        High = 4 => "High",
        Expert = 5 => "Expert",
    }
);

rubric!(
    /// Rating of one aspect (correctness, relevance, expression) of one part
    /// of a question.
    Rating {
        Good = 1 => "Good",
        Correctable = 2 => "Correctable",
        Unusable = 3 => "Unusable",
    }
);

rubric!(
    /// Overall verdict of a review.
    Evaluation {
        Accepted = 1 => "Accepted",
        NeedsRevision = 2 => "Needs revision",
        Rejected = 3 => "Rejected",
    }
);
