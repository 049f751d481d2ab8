//! Store trailer: `"<TypeDescriptor> <StoreVersion>"` at the end of the file

/// Version written by this build
pub const STORE_VERSION: &str = "v0.A.1";

/// Versions an older build wrote; stores carrying them need migration
const LEGACY_VERSIONS: &[&str] = &["v0.9.5", "v0.9.9", "v0.A.0"];

/// Descriptors that were renamed, as `(current, previous)`
const RENAMED_DESCRIPTORS: &[(&str, &str)] = &[
    ("RelationshipTypeTokenStore", "RelationshipTypeStore"),
    ("PropertyKeyTokenStore", "PropertyIndexStore"),
];

/// Outcome of comparing a trailer against the expected one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionCheck {
    /// Trailer matches this build
    Current,
    /// Trailer names an older version of this store
    NeedsMigration(String),
    /// Trailer missing or unrecognised
    Unrecognised(String),
}

/// Trailer written for `descriptor`
pub fn trailer(descriptor: &str) -> String {
    format!("{} {}", descriptor, STORE_VERSION)
}

/// Compare the last bytes of a store file with the expected trailer
///
/// `tail` holds the final `trailer(descriptor).len()` bytes of the file, or
/// fewer if the file is shorter.
pub fn check_trailer(descriptor: &str, tail: &[u8]) -> VersionCheck {
    let expected = trailer(descriptor);
    if tail == expected.as_bytes() {
        return VersionCheck::Current;
    }
    let found = String::from_utf8_lossy(tail).into_owned();

    // older trailers are never longer than the current one
    for version in LEGACY_VERSIONS.iter().chain(std::iter::once(&STORE_VERSION)) {
        for name in known_names(descriptor) {
            let candidate = format!("{} {}", name, version);
            if candidate != expected && found.ends_with(&candidate) {
                return VersionCheck::NeedsMigration(candidate);
            }
        }
    }
    VersionCheck::Unrecognised(found)
}

fn known_names(descriptor: &str) -> impl Iterator<Item = &str> {
    std::iter::once(descriptor).chain(
        RENAMED_DESCRIPTORS
            .iter()
            .filter(move |(current, _)| *current == descriptor)
            .map(|(_, previous)| *previous),
    )
}
