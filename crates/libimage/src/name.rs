//! Docker-style image names.
//!
//! Two views of the same grammar live here. [`DecomposedName`] keeps a name
//! exactly as written so that callers can tell whether a registry was given
//! and qualify it with a search registry. [`DockerReference`] is the
//! normalized form (`docker.io`, `library/`, `latest`) that registries and
//! local storage agree on.
use std::fmt::{self, Display};

use once_cell::sync::Lazy;
use regex::Regex;

pub const DEFAULT_LOCAL_REGISTRY: &str = "localhost";
pub const DEFAULT_DOMAIN: &str = "docker.io";
pub const DEFAULT_TAG: &str = "latest";
const LEGACY_DEFAULT_DOMAIN: &str = "index.docker.io";
const OFFICIAL_REPO_PREFIX: &str = "library/";
const NAME_TOTAL_LENGTH_MAX: usize = 255;

static DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])(?:\.(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]))*(?::[0-9]+)?$",
    )
    .unwrap()
});
static PATH_COMPONENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|[-]*)[a-z0-9]+)*$").unwrap());
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w][\w.-]{0,127}$").unwrap());
static DIGEST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[[:xdigit:]]{32,}$").unwrap()
});
static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-f0-9]{64}$").unwrap());

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NameError {
    #[error("repository name must have at least one component")]
    Empty,
    #[error("invalid reference format: {0:?}")]
    InvalidFormat(String),
    #[error("invalid reference format: repository name must be lowercase: {0:?}")]
    Uppercase(String),
    #[error("repository name must not be more than {NAME_TOTAL_LENGTH_MAX} characters: {0:?}")]
    NameTooLong(String),
    #[error("invalid tag {tag:?} in {input:?}")]
    InvalidTag { input: String, tag: String },
    #[error("invalid digest {digest:?} in {input:?}")]
    InvalidDigest { input: String, digest: String },
    #[error("invalid registry {0:?}")]
    InvalidRegistry(String),
    #[error("invalid repository name ({0}), cannot specify 64-byte hexadecimal strings")]
    Identifier(String),
    #[error("{0} already carries a registry")]
    RegistryAlreadySet(String),
}

type Result<T> = std::result::Result<T, NameError>;

/// An image name split into its parts without any normalization applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecomposedName {
    registry: Option<String>,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl DecomposedName {
    pub fn decompose(input: &str) -> Result<Self> {
        if input.is_empty() {
            return Err(NameError::Empty);
        }

        let (remainder, digest) = match input.split_once('@') {
            Some((name, digest)) => {
                if !DIGEST_RE.is_match(digest) {
                    return Err(NameError::InvalidDigest {
                        input: input.to_owned(),
                        digest: digest.to_owned(),
                    });
                }
                (name, Some(digest.to_owned()))
            }
            None => (input, None),
        };

        // A colon after the last slash starts the tag. Anything before a slash
        // is a registry port.
        let (name, tag) = match remainder.rfind(':') {
            Some(idx) if !remainder[idx + 1..].contains('/') => {
                let tag = &remainder[idx + 1..];
                if !TAG_RE.is_match(tag) {
                    return Err(NameError::InvalidTag {
                        input: input.to_owned(),
                        tag: tag.to_owned(),
                    });
                }
                (&remainder[..idx], Some(tag.to_owned()))
            }
            _ => (remainder, None),
        };

        if name.is_empty() {
            return Err(NameError::InvalidFormat(input.to_owned()));
        }
        if name.len() > NAME_TOTAL_LENGTH_MAX {
            return Err(NameError::NameTooLong(input.to_owned()));
        }

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest)) if looks_like_registry(first) => {
                if !DOMAIN_RE.is_match(first) {
                    return Err(NameError::InvalidFormat(input.to_owned()));
                }
                (Some(first.to_owned()), rest)
            }
            _ => (None, name),
        };

        for component in repository.split('/') {
            if PATH_COMPONENT_RE.is_match(component) {
                continue;
            }
            if component.chars().any(|c| c.is_ascii_uppercase())
                && PATH_COMPONENT_RE.is_match(&component.to_ascii_lowercase())
            {
                return Err(NameError::Uppercase(input.to_owned()));
            }
            return Err(NameError::InvalidFormat(input.to_owned()));
        }

        Ok(Self {
            registry,
            repository: repository.to_owned(),
            tag,
            digest,
        })
    }

    pub fn has_registry(&self) -> bool {
        self.registry.is_some()
    }

    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Qualifies an unqualified name with `registry`. The repository path,
    /// tag and digest are carried over untouched.
    pub fn reference_with_registry(&self, registry: &str) -> Result<DecomposedName> {
        if self.has_registry() {
            return Err(NameError::RegistryAlreadySet(self.to_string()));
        }
        if !DOMAIN_RE.is_match(registry) {
            return Err(NameError::InvalidRegistry(registry.to_owned()));
        }

        Ok(DecomposedName {
            registry: Some(registry.to_owned()),
            ..self.clone()
        })
    }
}

impl Display for DecomposedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{registry}/")?;
        }
        write!(f, "{}", self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

fn looks_like_registry(component: &str) -> bool {
    component.contains(|c| c == '.' || c == ':')
        || component == DEFAULT_LOCAL_REGISTRY
        || component.to_lowercase() != component
}

/// A fully normalized docker reference as understood by registries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DockerReference {
    domain: String,
    path: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl DockerReference {
    pub fn parse_normalized(input: &str) -> Result<Self> {
        if IDENTIFIER_RE.is_match(input) {
            return Err(NameError::Identifier(input.to_owned()));
        }

        let parts = DecomposedName::decompose(input)?;
        let mut domain = parts
            .registry
            .unwrap_or_else(|| DEFAULT_DOMAIN.to_owned());
        if domain == LEGACY_DEFAULT_DOMAIN {
            domain = DEFAULT_DOMAIN.to_owned();
        }

        let mut path = parts.repository;
        if domain == DEFAULT_DOMAIN && !path.contains('/') {
            path = format!("{OFFICIAL_REPO_PREFIX}{path}");
        }

        Ok(Self {
            domain,
            path,
            tag: parts.tag,
            digest: parts.digest,
        })
    }

    /// Adds the `latest` tag when the reference names neither a tag nor a
    /// digest.
    pub fn with_default_tag(mut self) -> Self {
        if self.is_name_only() {
            self.tag = Some(DEFAULT_TAG.to_owned());
        }
        self
    }

    pub fn is_name_only(&self) -> bool {
        self.tag.is_none() && self.digest.is_none()
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// The repository name without tag or digest.
    pub fn name(&self) -> String {
        format!("{}/{}", self.domain, self.path)
    }
}

impl Display for DockerReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.path)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

/// Normalizes a tag recorded in an image archive. Tags without a registry
/// are placed under `localhost` and untagged names get `latest`.
pub fn normalized_tag(tag: &str) -> Result<DockerReference> {
    let decomposed = DecomposedName::decompose(tag)?;
    let qualified = if decomposed.has_registry() {
        tag.to_owned()
    } else {
        decomposed
            .reference_with_registry(DEFAULT_LOCAL_REGISTRY)?
            .to_string()
    };

    Ok(DockerReference::parse_normalized(&qualified)?.with_default_tag())
}

/// Converts a path-like name into a `localhost/` prefixed image name.
pub fn to_local_image_name(name: &str) -> String {
    format!("{DEFAULT_LOCAL_REGISTRY}/{}", name.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::{Arbitrary, Gen};

    #[test]
    fn test_decompose_unqualified() {
        let name = DecomposedName::decompose("busybox").unwrap();
        assert!(!name.has_registry());
        assert_eq!(name.repository(), "busybox");
        assert_eq!(name.tag(), None);
        assert_eq!(name.digest(), None);
    }

    #[test]
    fn test_decompose_registry_with_port() {
        let name = DecomposedName::decompose("localhost:5000/team/app:v1.2").unwrap();
        assert_eq!(name.registry(), Some("localhost:5000"));
        assert_eq!(name.repository(), "team/app");
        assert_eq!(name.tag(), Some("v1.2"));
    }

    #[test]
    fn test_decompose_first_component_without_dot_is_repository() {
        let name = DecomposedName::decompose("library/busybox").unwrap();
        assert!(!name.has_registry());
        assert_eq!(name.repository(), "library/busybox");
    }

    #[test]
    fn test_decompose_digest() {
        let digest = format!("sha256:{}", "a".repeat(64));
        let name = DecomposedName::decompose(&format!("quay.io/app@{digest}")).unwrap();
        assert_eq!(name.registry(), Some("quay.io"));
        assert_eq!(name.digest(), Some(digest.as_str()));
        assert_eq!(name.tag(), None);
    }

    #[test]
    fn test_decompose_errors() {
        assert_eq!(DecomposedName::decompose(""), Err(NameError::Empty));
        assert!(matches!(
            DecomposedName::decompose("Busybox"),
            Err(NameError::Uppercase(_))
        ));
        assert!(matches!(
            DecomposedName::decompose("busybox:bad tag"),
            Err(NameError::InvalidTag { .. })
        ));
        assert!(matches!(
            DecomposedName::decompose("busybox@sha256:abc"),
            Err(NameError::InvalidDigest { .. })
        ));
        assert!(matches!(
            DecomposedName::decompose("a//b"),
            Err(NameError::InvalidFormat(_))
        ));
        let long = "a".repeat(NAME_TOTAL_LENGTH_MAX + 1);
        assert!(matches!(
            DecomposedName::decompose(&long),
            Err(NameError::NameTooLong(_))
        ));
    }

    #[test]
    fn test_reference_with_registry() {
        let name = DecomposedName::decompose("busybox:1.36").unwrap();
        let qualified = name.reference_with_registry("quay.io").unwrap();
        assert_eq!(qualified.to_string(), "quay.io/busybox:1.36");

        assert!(matches!(
            qualified.reference_with_registry("docker.io"),
            Err(NameError::RegistryAlreadySet(_))
        ));
        assert!(matches!(
            name.reference_with_registry("-bad-"),
            Err(NameError::InvalidRegistry(_))
        ));
    }

    #[test]
    fn test_parse_normalized() {
        let reference = DockerReference::parse_normalized("busybox").unwrap();
        assert_eq!(reference.to_string(), "docker.io/library/busybox");
        assert_eq!(
            reference.with_default_tag().to_string(),
            "docker.io/library/busybox:latest"
        );

        let reference = DockerReference::parse_normalized("index.docker.io/user/app:1").unwrap();
        assert_eq!(reference.to_string(), "docker.io/user/app:1");
        assert_eq!(reference.name(), "docker.io/user/app");

        let reference = DockerReference::parse_normalized("quay.io/app").unwrap();
        assert_eq!(reference.path(), "app");

        assert!(matches!(
            DockerReference::parse_normalized(&"f".repeat(64)),
            Err(NameError::Identifier(_))
        ));
    }

    #[test]
    fn test_normalized_tag() {
        assert_eq!(
            normalized_tag("busybox").unwrap().to_string(),
            "localhost/busybox:latest"
        );
        assert_eq!(
            normalized_tag("app:v2").unwrap().to_string(),
            "localhost/app:v2"
        );
        assert_eq!(
            normalized_tag("docker.io/busybox:1").unwrap().to_string(),
            "docker.io/library/busybox:1"
        );
    }

    #[test]
    fn test_to_local_image_name() {
        assert_eq!(to_local_image_name("/tmp/image"), "localhost/tmp/image");
        assert_eq!(to_local_image_name("image"), "localhost/image");
    }

    #[derive(Debug, Clone)]
    struct UnqualifiedName(String);

    const ALPHABET: &[char] = &[
        'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r',
        's', 't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
    ];

    fn component(g: &mut Gen) -> String {
        let len = usize::arbitrary(g) % 8 + 1;
        (0..len).map(|_| *g.choose(ALPHABET).unwrap()).collect()
    }

    impl Arbitrary for UnqualifiedName {
        fn arbitrary(g: &mut Gen) -> Self {
            let depth = usize::arbitrary(g) % 3 + 1;
            let mut components: Vec<String> = (0..depth).map(|_| component(g)).collect();
            if components[0] == DEFAULT_LOCAL_REGISTRY {
                components[0].insert(0, 'x');
            }
            let mut name = components.join("/");
            if bool::arbitrary(g) {
                name.push(':');
                name.push_str(&component(g));
            }
            Self(name)
        }
    }

    #[derive(Debug, Clone)]
    struct Registry(&'static str);

    impl Arbitrary for Registry {
        fn arbitrary(g: &mut Gen) -> Self {
            Self(
                g.choose(&[
                    "docker.io",
                    "quay.io",
                    "registry.example.com:5000",
                    "localhost",
                    "localhost:8080",
                ])
                .copied()
                .unwrap(),
            )
        }
    }

    #[test]
    fn test_reference_with_registry_round_trip() {
        fn prop(name: UnqualifiedName, registry: Registry) -> bool {
            let original = DecomposedName::decompose(&name.0).unwrap();
            let qualified = original.reference_with_registry(registry.0).unwrap();
            let again = DecomposedName::decompose(&qualified.to_string()).unwrap();
            again.registry() == Some(registry.0)
                && again.repository() == original.repository()
                && again.tag() == original.tag()
        }

        quickcheck::quickcheck(prop as fn(UnqualifiedName, Registry) -> bool);
    }
}
