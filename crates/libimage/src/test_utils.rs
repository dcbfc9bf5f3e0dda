use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::json;
use sha2::{Digest, Sha256};

const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
const CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";

/// One image to place in a test archive. The seed makes each config blob,
/// and therefore its digest, unique.
pub(crate) struct ArchivedImage {
    pub config: String,
    pub tags: Vec<String>,
}

impl ArchivedImage {
    pub fn new(seed: &str, tags: &[&str]) -> Self {
        let config = json!({
            "architecture": "amd64",
            "os": "linux",
            "config": { "Labels": { "seed": seed } },
            "rootfs": { "type": "layers", "diff_ids": [] },
        });
        Self {
            config: config.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn config_hex(&self) -> String {
        format!("{:x}", Sha256::digest(self.config.as_bytes()))
    }
}

fn append<W: std::io::Write>(builder: &mut tar::Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, name, data)?;
    Ok(())
}

pub(crate) fn write_docker_archive(dir: &Path, images: &[ArchivedImage]) -> Result<PathBuf> {
    let path = dir.join("docker-archive.tar");
    let mut builder = tar::Builder::new(File::create(&path)?);

    let mut manifest = Vec::new();
    for image in images {
        let config_name = format!("{}.json", image.config_hex());
        append(&mut builder, &config_name, image.config.as_bytes())?;
        manifest.push(json!({
            "Config": config_name,
            "RepoTags": image.tags,
            "Layers": [],
        }));
    }
    append(&mut builder, "manifest.json", &serde_json::to_vec(&manifest)?)?;
    builder.finish()?;

    Ok(path)
}

/// Writes an oci-archive. The first tag of each image becomes its
/// `org.opencontainers.image.ref.name` annotation.
pub(crate) fn write_oci_archive(dir: &Path, images: &[ArchivedImage]) -> Result<PathBuf> {
    let path = dir.join("oci-archive.tar");
    let mut builder = tar::Builder::new(File::create(&path)?);
    append(
        &mut builder,
        "oci-layout",
        br#"{"imageLayoutVersion":"1.0.0"}"#,
    )?;

    let mut descriptors = Vec::new();
    for image in images {
        let config_hex = image.config_hex();
        append(
            &mut builder,
            &format!("blobs/sha256/{config_hex}"),
            image.config.as_bytes(),
        )?;

        let manifest = json!({
            "schemaVersion": 2,
            "mediaType": MANIFEST_MEDIA_TYPE,
            "config": {
                "mediaType": CONFIG_MEDIA_TYPE,
                "digest": format!("sha256:{config_hex}"),
                "size": image.config.len(),
            },
            "layers": [],
        })
        .to_string();
        let manifest_hex = format!("{:x}", Sha256::digest(manifest.as_bytes()));
        append(
            &mut builder,
            &format!("blobs/sha256/{manifest_hex}"),
            manifest.as_bytes(),
        )?;

        let mut descriptor = json!({
            "mediaType": MANIFEST_MEDIA_TYPE,
            "digest": format!("sha256:{manifest_hex}"),
            "size": manifest.len(),
        });
        if let Some(tag) = image.tags.first() {
            descriptor["annotations"] = json!({ "org.opencontainers.image.ref.name": tag });
        }
        descriptors.push(descriptor);
    }

    let index = json!({ "schemaVersion": 2, "manifests": descriptors });
    append(&mut builder, "index.json", index.to_string().as_bytes())?;
    builder.finish()?;

    Ok(path)
}
