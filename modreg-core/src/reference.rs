use crate::error::EngineError;

// equality is case-sensitive on registry/repository/tag; caller normalizes the host first
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModuleReference {
    Local { path: String },
    Oci(OciReference),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OciReference {
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

impl OciReference {
    pub fn repository_segments(&self) -> impl Iterator<Item = &str> {
        self.repository.split('/')
    }
}

impl std::fmt::Display for ModuleReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleReference::Local { path } => write!(f, "{path}"),
            ModuleReference::Oci(r) => write!(f, "oci:{}/{}:{}", r.registry, r.repository, r.tag),
        }
    }
}

impl std::str::FromStr for ModuleReference {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

// oci:<host>/<repo>[/<repo>...]:<tag>, or a bare/relative path for a local module.
// unrecognized scheme -> Malformed, not UnsupportedTarget (that one's for an otherwise-valid
// scheme a given command just doesn't accept)
pub fn parse(s: &str) -> Result<ModuleReference, EngineError> {
    if s.starts_with("./") || s.starts_with("../") {
        return Ok(ModuleReference::Local { path: s.to_string() });
    }

    match s.split_once(':') {
        Some(("oci", rest)) => parse_oci_body(rest).map(ModuleReference::Oci),
        Some((scheme, rest)) if !scheme.is_empty() && rest.is_empty() => {
            Err(EngineError::Malformed(format!("empty reference after scheme {scheme:?}")))
        }
        Some((scheme, _)) => Err(EngineError::Malformed(format!("unrecognized scheme {scheme:?}"))),
        None => Ok(ModuleReference::Local { path: s.to_string() }),
    }
}

fn parse_oci_body(body: &str) -> Result<OciReference, EngineError> {
    if body.is_empty() {
        return Err(EngineError::Malformed("empty oci reference".into()));
    }

    let (host_and_repo, tag) = body
        .rsplit_once(':')
        .ok_or_else(|| EngineError::Malformed(format!("oci reference missing tag: {body}")))?;
    if tag.is_empty() {
        return Err(EngineError::Malformed(format!("oci reference has empty tag: {body}")));
    }

    let (registry, repository) = host_and_repo
        .split_once('/')
        .ok_or_else(|| EngineError::Malformed(format!("oci reference missing repository: {body}")))?;
    if !is_valid_dns_name(registry) {
        return Err(EngineError::Malformed(format!("invalid registry host: {registry}")));
    }
    if repository.is_empty() {
        return Err(EngineError::Malformed(format!("empty repository: {body}")));
    }

    Ok(OciReference {
        registry: registry.to_string(),
        repository: repository.to_string(),
        tag: tag.to_string(),
    })
}

pub fn require_oci(reference: &ModuleReference) -> Result<&OciReference, EngineError> {
    match reference {
        ModuleReference::Oci(r) => Ok(r),
        ModuleReference::Local { .. } => Err(EngineError::UnsupportedTarget),
    }
}

fn is_valid_dns_name(host: &str) -> bool {
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    let host_without_port = host.split_once(':').map(|(h, _)| h).unwrap_or(host);
    host_without_port.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_local_relative() {
        assert_eq!(
            ModuleReference::Local { path: "./foo.bicep".into() },
            parse("./foo.bicep").unwrap()
        );
        assert_eq!(
            ModuleReference::Local { path: "../shared/foo.bicep".into() },
            parse("../shared/foo.bicep").unwrap()
        );
    }

    #[test]
    fn parses_bare_path_as_local() {
        assert_eq!(
            ModuleReference::Local { path: "foo.bicep".into() },
            parse("foo.bicep").unwrap()
        );
    }

    #[test]
    fn parses_oci_reference() {
        let r = parse("oci:example.com/test/x:v1").unwrap();
        assert_eq!(
            r,
            ModuleReference::Oci(OciReference {
                registry: "example.com".into(),
                repository: "test/x".into(),
                tag: "v1".into(),
            })
        );
    }

    #[test]
    fn oci_repository_may_contain_slashes() {
        let r = parse("oci:registry.example.com/a/b/c:latest").unwrap();
        match r {
            ModuleReference::Oci(r) => {
                assert_eq!(r.repository, "a/b/c");
                assert_eq!(r.repository_segments().collect::<Vec<_>>(), ["a", "b", "c"]);
            }
            _ => panic!("expected oci reference"),
        }
    }

    #[test]
    fn empty_scheme_body_is_malformed() {
        assert!(matches!(parse("fake:"), Err(EngineError::Malformed(_))));
    }

    #[test]
    fn unknown_scheme_is_malformed() {
        assert!(matches!(parse("fake:thing"), Err(EngineError::Malformed(_))));
    }

    #[test]
    fn oci_missing_tag_is_malformed() {
        assert!(matches!(parse("oci:example.com/test/x"), Err(EngineError::Malformed(_))));
    }

    #[test]
    fn oci_bad_host_is_malformed() {
        assert!(matches!(parse("oci:not a host/repo:tag"), Err(EngineError::Malformed(_))));
    }

    #[test]
    fn require_oci_rejects_local() {
        let local = ModuleReference::Local { path: "./test.bicep".into() };
        assert!(matches!(require_oci(&local), Err(EngineError::UnsupportedTarget)));
    }

    #[test]
    fn equality_is_case_sensitive() {
        let a = parse("oci:example.com/Test/X:V1").unwrap();
        let b = parse("oci:example.com/test/x:v1").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn display_round_trips_oci() {
        let r = parse("oci:example.com/test/x:v1").unwrap();
        assert_eq!(r.to_string(), "oci:example.com/test/x:v1");
    }
}
