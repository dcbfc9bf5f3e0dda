use std::collections::BTreeMap;

use crate::archive::ArchiveError;
use crate::copy::CopyError;
use crate::name::NameError;
use crate::reference::ReferenceError;
use crate::registries::RegistriesError;
use crate::store::StoreError;

/// A ref-pair that could not be copied, kept so aggregated failures name
/// the image they belong to.
#[derive(Debug)]
pub struct PairFailure {
    pub image: String,
    pub error: CopyError,
}

#[derive(Debug, thiserror::Error)]
pub enum PullError {
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    #[error("invalid image name {input:?}")]
    Name {
        input: String,
        #[source]
        source: NameError,
    },
    #[error("error getting default registries to try")]
    Registries(#[from] RegistriesError),
    #[error("image name provided is a short name and no search registries are defined in the registries config file.")]
    NoSearchRegistries,
    #[error("error parsing dest reference name {name:?}")]
    StoreReference {
        name: String,
        #[source]
        source: StoreError,
    },
    #[error("error loading manifest for {reference:?}")]
    Archive {
        reference: String,
        #[source]
        source: ArchiveError,
    },
    #[error("{image} has no label {label} in {labels:?}")]
    MissingLabel {
        image: String,
        label: String,
        labels: BTreeMap<String, String>,
    },
    #[error(transparent)]
    Copy(#[from] CopyError),
    #[error("{}", aggregate_message(.0))]
    Aggregate(Vec<PairFailure>),
    #[error("pull cancelled before trying {0}")]
    Cancelled(String),
    #[error("failed to write pull progress")]
    Progress(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PullError>;

fn aggregate_message(failures: &[PairFailure]) -> String {
    if failures.is_empty() {
        return "unable to pull image, or you do not have pull access".to_owned();
    }

    let mut message = format!("{} errors occurred while pulling:", failures.len());
    for failure in failures {
        message.push_str(&format!("\n  * {}: {}", failure.image, failure.error));
    }
    message
}
