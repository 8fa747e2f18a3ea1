//! Record id generation.
//!
//! Ids are opaque strings in the 8-4-4-4-12 hex layout. The default
//! generator produces random v4 UUIDs; the legacy generator produces the
//! same shape from plain random hex with no version or variant bits.
//! Neither checks for collisions against existing records.

use crate::types::RecordId;
use rand::Rng;
use uuid::Uuid;

/// Lengths of the hyphen-separated hex groups of a generated id.
const GROUP_LENGTHS: [usize; 5] = [8, 4, 4, 4, 12];

/// Produces fresh record ids.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> RecordId;
}

/// Random v4 UUIDs, hyphenated lower-case.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> RecordId {
        RecordId(Uuid::new_v4().hyphenated().to_string())
    }
}

/// Pseudo-GUIDs concatenated from random 4-hex-digit segments.
#[derive(Clone, Copy, Debug, Default)]
pub struct LegacyGuidGenerator;

impl LegacyGuidGenerator {
    fn segment(rng: &mut impl Rng) -> String {
        format!("{:04x}", rng.gen::<u16>())
    }
}

impl IdGenerator for LegacyGuidGenerator {
    fn generate(&self) -> RecordId {
        let mut rng = rand::thread_rng();
        let mut s4 = || Self::segment(&mut rng);
        RecordId(format!(
            "{}{}-{}-{}-{}-{}{}{}",
            s4(),
            s4(),
            s4(),
            s4(),
            s4(),
            s4(),
            s4(),
            s4()
        ))
    }
}

/// Which generator a store uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IdScheme {
    #[default]
    Uuid,
    LegacyGuid,
}

impl IdScheme {
    pub fn generator(self) -> Box<dyn IdGenerator> {
        match self {
            IdScheme::Uuid => Box::new(UuidGenerator),
            IdScheme::LegacyGuid => Box::new(LegacyGuidGenerator),
        }
    }
}

/// Check whether `s` has the 8-4-4-4-12 hex layout.
pub fn is_guid_shaped(s: &str) -> bool {
    let groups: Vec<&str> = s.split('-').collect();
    groups.len() == GROUP_LENGTHS.len()
        && groups
            .iter()
            .zip(GROUP_LENGTHS)
            .all(|(group, len)| group.len() == len && group.bytes().all(|b| b.is_ascii_hexdigit()))
}
