//! Snapshot derives Snapshots from build PipelineRuns.

use std::{collections::BTreeMap, sync::LazyLock};

use regex::Regex;
use validator::Validate;

use crate::{labels, pipelinerun, prelude::*};
use api::{
    ComponentSource, GitSource,
    v1alpha1::{Application, Component, Snapshot, SnapshotComponent, SnapshotSpec},
};

// Digest grammar from the OCI image spec.
static DIGEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[a-zA-Z0-9=_-]+$").expect("digest regexp")
});

/// Is_valid_digest reports whether `digest` is a well-formed "algorithm:hex" digest.
///
/// Registered algorithms also have their encoded length and alphabet checked.
pub fn is_valid_digest(digest: &str) -> bool {
    if !DIGEST.is_match(digest) {
        return false;
    }
    let (alg, enc) = match digest.split_once(':') {
        Some(p) => p,
        None => return false,
    };
    let want = match alg {
        "sha256" => 64,
        "sha512" => 128,
        _ => return true,
    };
    enc.len() == want && enc.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Validate_image_reference checks that `image` is digest-qualified.
pub fn validate_image_reference(component: &str, image: &str) -> Result<()> {
    match image.rsplit_once('@') {
        Some((repo, digest)) if !repo.is_empty() && is_valid_digest(digest) => Ok(()),
        _ => Err(Error::InvalidImageDigest {
            component: component.into(),
            image: image.into(),
        }),
    }
}

/// Propagate copies the allow-listed keys of `src` into `dst`.
///
/// Pipelines-as-Code keys are renamed into the test prefix, build and custom keys are copied
/// verbatim, as are the PR group keys. Everything else is dropped.
pub fn propagate(src: &BTreeMap<String, String>, dst: &mut BTreeMap<String, String>) {
    for (k, v) in src {
        if let Some(rest) = k.strip_prefix(labels::PAC_PREFIX) {
            dst.insert(labels::pac_test_label(rest), v.clone());
        } else if k.starts_with(labels::BUILD_PREFIX)
            || k.starts_with(labels::CUSTOM_PREFIX)
            || k == labels::PR_GROUP_ANNOTATION
            || k == labels::PR_GROUP_HASH_LABEL
        {
            dst.insert(k.clone(), v.clone());
        }
    }
}

/// Prepare_snapshot builds, but does not create, the Snapshot for a successful build.
///
/// `components` is the Application's full component set. Components other than the one just
/// built contribute their deployed image when it carries a valid digest and are left out
/// otherwise.
#[instrument(skip_all, fields(pipelinerun = %plr.name_any(), component = %component.name_any()))]
pub fn prepare_snapshot(
    plr: &PipelineRun,
    component: &Component,
    application: &Application,
    components: &[Component],
) -> Result<Snapshot> {
    let plr_name = plr.name_any();
    let missing = |key: &str| Error::MissingInfo {
        key: key.into(),
        pipeline_run: plr_name.clone(),
    };
    let digest = pipelinerun::result(plr, pipelinerun::IMAGE_DIGEST)
        .ok_or_else(|| missing(pipelinerun::IMAGE_DIGEST))?;
    let url = pipelinerun::result(plr, pipelinerun::IMAGE_URL)
        .ok_or_else(|| missing(pipelinerun::IMAGE_URL))?;
    let git_url = pipelinerun::result(plr, pipelinerun::GIT_URL)
        .ok_or_else(|| missing(pipelinerun::GIT_URL))?;
    let revision = pipelinerun::result(plr, pipelinerun::GIT_COMMIT);

    let built = component.name_any();
    let image = format!("{url}@{digest}");
    if !is_valid_digest(digest) {
        return Err(Error::InvalidImageDigest {
            component: built,
            image,
        });
    }
    let built_entry = SnapshotComponent {
        name: built.clone(),
        container_image: image,
        source: Some(ComponentSource {
            git: Some(GitSource {
                url: git_url.into(),
                revision: revision.map(String::from),
                ..Default::default()
            }),
        }),
    };

    let mut entries = Vec::with_capacity(components.len());
    let mut seen = false;
    for c in components {
        let name = c.name_any();
        if name == built {
            seen = true;
            entries.push(built_entry.clone());
            continue;
        }
        let Some(image) = c.deployed_image() else {
            debug!(component = name, "no deployed image, leaving out of snapshot");
            continue;
        };
        if let Err(err) = validate_image_reference(&name, image) {
            debug!(component = name, %err, "leaving out of snapshot");
            continue;
        }
        entries.push(SnapshotComponent {
            name,
            container_image: image.into(),
            source: c.spec.source.clone(),
        });
    }
    if !seen {
        entries.insert(0, built_entry);
    }

    let app = application.name_any();
    let mut snapshot = Snapshot::new(
        "",
        SnapshotSpec {
            application: app.clone(),
            components: entries,
            ..Default::default()
        },
    );
    let meta = snapshot.meta_mut();
    meta.name = None;
    meta.generate_name = Some(format!("{app}-"));
    meta.namespace = plr.namespace();
    if let Some(owner) = application.controller_owner_ref(&()) {
        meta.owner_references = Some(vec![owner]);
    }

    let dst = snapshot.labels_mut();
    propagate(plr.labels(), dst);
    dst.insert(
        labels::SNAPSHOT_TYPE_LABEL.into(),
        labels::SNAPSHOT_TYPE_COMPONENT.into(),
    );
    dst.insert(labels::COMPONENT_LABEL.into(), built);
    dst.insert(labels::BUILD_PIPELINERUN_LABEL.into(), plr_name);
    dst.insert(labels::APPLICATION_LABEL.into(), app);

    let dst = snapshot.annotations_mut();
    propagate(plr.annotations(), dst);
    if let Some(ts) = pipelinerun::start_time(plr) {
        dst.insert(labels::BUILD_START_TIME_ANNOTATION.into(), ts.to_string());
    }

    snapshot.spec.validate()?;
    Ok(snapshot)
}

/// Provisional returns an uncreated Snapshot carrying the build's provenance.
///
/// It's only used to address git provider reports before the real Snapshot exists.
pub fn provisional(plr: &PipelineRun, component: &str, application: &str) -> Snapshot {
    let mut snapshot = Snapshot::new(
        &plr.name_any(),
        SnapshotSpec {
            application: application.into(),
            ..Default::default()
        },
    );
    snapshot.meta_mut().namespace = plr.namespace();
    let dst = snapshot.labels_mut();
    propagate(plr.labels(), dst);
    dst.insert(
        labels::SNAPSHOT_TYPE_LABEL.into(),
        labels::SNAPSHOT_TYPE_COMPONENT.into(),
    );
    dst.insert(labels::COMPONENT_LABEL.into(), component.into());
    dst.insert(labels::APPLICATION_LABEL.into(), application.into());
    propagate(plr.annotations(), snapshot.annotations_mut());
    snapshot
}

fn created_key(s: &Snapshot) -> (Option<k8s_openapi::jiff::Timestamp>, String) {
    (
        s.meta().creation_timestamp.as_ref().map(|t| t.0),
        s.name_any(),
    )
}

/// Earliest picks the canonical Snapshot out of several: oldest creation time, then name.
pub fn earliest(snapshots: &[Snapshot]) -> Option<&Snapshot> {
    snapshots.iter().min_by_key(|s| created_key(s))
}

/// Sort_newest_first orders Snapshots by descending creation time.
pub fn sort_newest_first(snapshots: &mut [Snapshot]) {
    snapshots.sort_by_key(|s| std::cmp::Reverse(created_key(s)));
}

pub fn is_component_snapshot(s: &Snapshot) -> bool {
    s.labels()
        .get(labels::SNAPSHOT_TYPE_LABEL)
        .is_some_and(|t| t == labels::SNAPSHOT_TYPE_COMPONENT)
}
