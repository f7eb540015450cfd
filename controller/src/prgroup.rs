//! Prgroup holds the pure parts of PR group coordination.
//!
//! A PR group is every build of an Application's components that came from the same source
//! branch. It isn't stored anywhere; builds and Snapshots just carry the same
//! [`labels::PR_GROUP_HASH_LABEL`] label and [`labels::PR_GROUP_ANNOTATION`] annotation.

use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

use crate::{labels, pipelinerun, prelude::*};

/// HASH_LEN is the number of hex characters kept from the digest.
pub const HASH_LEN: usize = 16;

/// Group_hash returns the label-safe identity of a PR group.
pub fn group_hash(group: &str) -> String {
    let mut enc = hex::encode(Sha256::digest(group.as_bytes()));
    enc.truncate(HASH_LEN);
    enc
}

/// Group_name returns the PR group a build belongs to, derived from its source branch.
pub fn group_name(plr: &PipelineRun) -> Option<&str> {
    pipelinerun::source_branch(plr)
}

/// Group_of returns the (name, hash) pair already annotated on an object, if complete.
pub fn group_of<K: ResourceExt>(obj: &K) -> Option<(&str, &str)> {
    let name = obj.annotations().get(labels::PR_GROUP_ANNOTATION)?;
    let hash = obj.labels().get(labels::PR_GROUP_HASH_LABEL)?;
    Some((name.as_str(), hash.as_str()))
}

/// Is_group_expected reports whether the components with an open PR need a group Snapshot.
///
/// A single component never does, even when other builds share its branch name.
pub fn is_group_expected<S: AsRef<str>>(components_with_open_pr: &[S]) -> bool {
    components_with_open_pr
        .iter()
        .map(AsRef::as_ref)
        .collect::<BTreeSet<_>>()
        .len()
        > 1
}

/// Failure_notice is the message fanned out when a build in a group fails.
pub fn failure_notice(plr: &str, component: &str, group: &str) -> String {
    format!(
        "build PLR {plr} failed for component {component} so it can't be added to the group Snapshot for PR group {group}"
    )
}
