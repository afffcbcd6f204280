use std::sync::atomic::{AtomicU32, Ordering};

pub type AssociationId = u32;

/// Generates association ids.
///
/// One generator instance is shared by every association of an endpoint and
/// is handed to the association at construction, so tests can run against an
/// isolated id space.
pub trait AssociationIdGenerator: Send + Sync {
    /// Generates a new AID.
    fn generate_aid(&self) -> AssociationId;
}

/// Hands out ids from a wrapping cursor, skipping zero so that an id of 0
/// can keep meaning "not assigned yet" at the socket layer.
#[derive(Debug, Default)]
pub struct CyclicAssociationIdGenerator {
    next: AtomicU32,
}

impl CyclicAssociationIdGenerator {
    pub fn new() -> Self {
        CyclicAssociationIdGenerator::default()
    }
}

impl AssociationIdGenerator for CyclicAssociationIdGenerator {
    fn generate_aid(&self) -> AssociationId {
        loop {
            let aid = self.next.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if aid != 0 {
                return aid;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cyclic_aid_generator_skips_zero_and_wraps() {
        let gen = CyclicAssociationIdGenerator::default();
        assert_eq!(gen.generate_aid(), 1);
        assert_eq!(gen.generate_aid(), 2);

        let gen = CyclicAssociationIdGenerator {
            next: AtomicU32::new(u32::MAX - 1),
        };
        assert_eq!(gen.generate_aid(), u32::MAX);
        assert_ne!(gen.generate_aid(), 0, "zero is reserved");
    }
}
