//! Field-level conflict resolution for diverged documents.
//!
//! Two revisions of the same document that share an origin are merged field
//! by field: each scalar field, the geolocation and the deletion flag take the
//! value with the later stamp. Ties fall back to the revision disambiguator,
//! then the generation, then the value itself, so the merge is the same no
//! matter which side is called local.

use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::models::{CustomerField, Document, Geolocation, Revision, SyncStatus};

// ── Resolution ────────────────────────────────────────────────────────────────

/// Outcome of resolving two revisions of one document.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A single merged document carrying a new merge revision.
    Merged(Box<Document>),
    /// The two documents share an id but no ancestor.
    ///
    /// `preferred` is the more recently updated candidate.
    Unmergeable {
        preferred: Box<Document>,
        other: Box<Document>,
    },
}

/// Which side supplied a merged field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Local,
    Remote,
}

/// Trait for conflict resolution strategies.
pub trait ConflictResolver: Send + Sync {
    fn resolve(&self, local: &Document, remote: &Document) -> Result<Resolution>;
}

/// Field-level last-writer-wins resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldMergeResolver;

impl ConflictResolver for FieldMergeResolver {
    fn resolve(&self, local: &Document, remote: &Document) -> Result<Resolution> {
        if local.id != remote.id {
            return Err(Error::InvalidInput(format!(
                "cannot resolve {} against {}",
                local.id, remote.id
            )));
        }
        let local_rev = local.require_revision()?;
        let remote_rev = remote.require_revision()?;

        if local.origin.is_none() || local.origin != remote.origin {
            let (preferred, other) = if rank(local, local_rev, remote, remote_rev).is_ge() {
                (local, remote)
            } else {
                (remote, local)
            };
            return Ok(Resolution::Unmergeable {
                preferred: Box::new(preferred.clone()),
                other: Box::new(other.clone()),
            });
        }

        Ok(Resolution::Merged(Box::new(merge(
            local, local_rev, remote, remote_rev,
        ))))
    }
}

// ── Merge ─────────────────────────────────────────────────────────────────────

fn merge(local: &Document, local_rev: &Revision, remote: &Document, remote_rev: &Revision) -> Document {
    let mut merged = local.clone();

    for field in CustomerField::ALL {
        let local_value = local.customer.field(field);
        let remote_value = remote.customer.field(field);
        let side = pick(
            (local.stamps.get(field), local_rev),
            (remote.stamps.get(field), remote_rev),
            || local_value.cmp(&remote_value),
        );
        if side == Side::Remote {
            merged.customer.set_field(field, remote_value);
            merged.stamps.set(field, remote.stamps.get(field));
        }
    }

    let geolocation = pick(
        (local.stamps.geolocation, local_rev),
        (remote.stamps.geolocation, remote_rev),
        || cmp_geolocation(local.customer.geolocation.as_ref(), remote.customer.geolocation.as_ref()),
    );
    if geolocation == Side::Remote {
        merged.customer.geolocation = remote.customer.geolocation;
        merged.stamps.geolocation = remote.stamps.geolocation;
    }

    let deleted = pick(
        (local.stamps.deleted, local_rev),
        (remote.stamps.deleted, remote_rev),
        || local.deleted.cmp(&remote.deleted),
    );
    if deleted == Side::Remote {
        merged.deleted = remote.deleted;
        merged.stamps.deleted = remote.stamps.deleted;
    }

    let mut parents = vec![local_rev.clone(), remote_rev.clone()];
    parents.sort_by_key(ToString::to_string);

    merged.revision = Some(Revision::merge(local_rev, remote_rev));
    merged.merged_from = parents;
    merged.synced_revision = None;
    merged.created_at = local.created_at.min(remote.created_at);
    merged.updated_at = merged.stamps.latest();
    merged.sync_status = SyncStatus::Pending;
    merged
}

/// Pick the side that wins one field.
fn pick(
    local: (i64, &Revision),
    remote: (i64, &Revision),
    by_value: impl FnOnce() -> Ordering,
) -> Side {
    let ordering = local
        .0
        .cmp(&remote.0)
        .then_with(|| local.1.disambiguator().cmp(remote.1.disambiguator()))
        .then_with(|| local.1.generation().cmp(&remote.1.generation()))
        .then_with(by_value);
    if ordering.is_lt() {
        Side::Remote
    } else {
        Side::Local
    }
}

/// Ranking of unmergeable candidates: later update first.
fn rank(local: &Document, local_rev: &Revision, remote: &Document, remote_rev: &Revision) -> Ordering {
    local
        .updated_at
        .cmp(&remote.updated_at)
        .then_with(|| local_rev.disambiguator().cmp(remote_rev.disambiguator()))
        .then_with(|| local_rev.generation().cmp(&remote_rev.generation()))
}

fn cmp_geolocation(a: Option<&Geolocation>, b: Option<&Geolocation>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a
            .latitude
            .total_cmp(&b.latitude)
            .then_with(|| a.longitude.total_cmp(&b.longitude))
            .then_with(|| a.accuracy.total_cmp(&b.accuracy))
            .then_with(|| a.captured_at.cmp(&b.captured_at)),
    }
}


#[cfg(test)]
mod proptest_suite {
    use super::*;
    use crate::models::{Customer, FieldStamps};
    use proptest::prelude::*;

    fn arb_side() -> impl Strategy<Value = (Vec<String>, Vec<i64>, bool)> {
        (
            prop::collection::vec("[a-z]{1,6}", 5),
            prop::collection::vec(0i64..5, 7),
            any::<bool>(),
        )
    }

    fn build(
        template: &Document,
        revision: Revision,
        (values, stamps, deleted): (Vec<String>, Vec<i64>, bool),
    ) -> Document {
        let mut doc = template.clone();
        for (field, value) in CustomerField::ALL.into_iter().zip(&values) {
            doc.customer.set_field(field, Some(value.as_str()));
        }
        doc.stamps = FieldStamps {
            business_name: stamps[0],
            contact_person: stamps[1],
            phone: stamps[2],
            email: stamps[3],
            address: stamps[4],
            geolocation: stamps[5],
            deleted: stamps[6],
        };
        doc.deleted = deleted;
        doc.updated_at = doc.stamps.latest();
        doc.revision = Some(revision);
        doc
    }

    fn pair(a: (Vec<String>, Vec<i64>, bool), b: (Vec<String>, Vec<i64>, bool)) -> (Document, Document) {
        let mut template =
            Document::new_customer(Customer::new("Acme", "Jane", "0700", "12 Kimathi St"));
        let origin = Revision::initial();
        template.origin = Some(origin.clone());
        let left = build(&template, origin.next(), a);
        let right = build(&template, origin.next(), b);
        (left, right)
    }

    fn content(doc: &Document) -> (crate::models::Customer, bool, FieldStamps, Option<Revision>) {
        (doc.customer.clone(), doc.deleted, doc.stamps, doc.revision.clone())
    }

    proptest! {
        #[test]
        fn resolve_commutative(a in arb_side(), b in arb_side()) {
            let (left, right) = pair(a, b);
            let lr = FieldMergeResolver.resolve(&left, &right).unwrap();
            let rl = FieldMergeResolver.resolve(&right, &left).unwrap();
            match (lr, rl) {
                (Resolution::Merged(x), Resolution::Merged(y)) => {
                    prop_assert_eq!(content(&x), content(&y));
                    prop_assert_eq!(&x.merged_from, &y.merged_from);
                }
                (x, y) => prop_assert!(false, "expected merges: {:?} vs {:?}", x, y),
            }
        }

        #[test]
        fn merged_generation_exceeds_parents(a in arb_side(), b in arb_side()) {
            let (left, right) = pair(a, b);
            let Resolution::Merged(doc) = FieldMergeResolver.resolve(&left, &right).unwrap() else {
                return Err(TestCaseError::fail("expected merge"));
            };
            let generation = doc.revision.as_ref().unwrap().generation();
            prop_assert_eq!(generation, 3);
        }

        #[test]
        fn merged_stamps_dominate(a in arb_side(), b in arb_side()) {
            let (left, right) = pair(a, b);
            let Resolution::Merged(doc) = FieldMergeResolver.resolve(&left, &right).unwrap() else {
                return Err(TestCaseError::fail("expected merge"));
            };
            for field in CustomerField::ALL {
                let expected = left.stamps.get(field).max(right.stamps.get(field));
                prop_assert_eq!(doc.stamps.get(field), expected);
            }
        }
    }
}
