//! Image reference handling.

/// Parts of `[registry[:port]/]repo[:tag][@digest]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference<'a> {
    pub repository: &'a str,
    pub tag: Option<&'a str>,
    pub digest: Option<&'a str>,
}

pub fn split_reference(reference: &str) -> ImageReference<'_> {
    let (name, digest) = match reference.split_once('@') {
        Some((name, digest)) => (name, Some(digest)),
        None => (reference, None),
    };
    // A colon only separates a tag when it comes after the last slash;
    // otherwise it is a registry port.
    let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    match name[last_slash..].rfind(':') {
        Some(i) => ImageReference {
            repository: &name[..last_slash + i],
            tag: Some(&name[last_slash + i + 1..]),
            digest,
        },
        None => ImageReference {
            repository: name,
            tag: None,
            digest,
        },
    }
}

pub fn repository(reference: &str) -> &str {
    split_reference(reference).repository
}

/// `reference` with its tag (and digest) replaced by `tag`.
pub fn with_tag(reference: &str, tag: &str) -> String {
    format!("{}:{}", repository(reference), tag)
}

/// Where to pull an image from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullTargets {
    pub primary: String,
    /// Tried when the primary pull fails; never equal to `primary`.
    pub fallback: Option<String>,
}

/// Apply the override tag to the repository of the "latest" reference (or the
/// pinned one when the manifest has none). The pinned reference stays as the
/// fallback target.
pub fn resolve_pull_targets(pinned: &str, latest: Option<&str>, tag: &str) -> PullTargets {
    let base = latest.unwrap_or(pinned);
    let primary = with_tag(base, tag);
    let fallback = (primary != pinned).then(|| pinned.to_string());
    PullTargets { primary, fallback }
}

/// Whether any `repo@digest` entry carries `digest`.
pub fn digests_match(repo_digests: &[String], digest: &str) -> bool {
    repo_digests
        .iter()
        .any(|entry| split_reference(entry).digest == Some(digest))
}
