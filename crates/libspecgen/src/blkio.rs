use std::path::Path;

use oci_spec::runtime::{
    LinuxBlockIo, LinuxBlockIoBuilder, LinuxThrottleDevice, LinuxThrottleDeviceBuilder,
    LinuxWeightDevice, LinuxWeightDeviceBuilder,
};
use oci_spec::OciSpecError;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::Resources;
use crate::host::{HostError, HostInfo};

static RATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+(?:\.\d+)?) ?([kKmMgGtTpP])?[iI]?[bB]?$").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum BlkioError {
    #[error("bad format {0:?}, expected <device-path>:<value>")]
    Format(String),
    #[error("{0:?} is not a device path under /dev/")]
    DevicePath(String),
    #[error("invalid weight in {0:?}, must be 0 or between 10 and 1000")]
    Weight(String),
    #[error("invalid rate in {0:?}")]
    Rate(String),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    OciSpec(#[from] OciSpecError),
}

type Result<T> = std::result::Result<T, BlkioError>;

fn split_device(input: &str) -> Result<(&str, &str)> {
    let (path, value) = input
        .rsplit_once(':')
        .ok_or_else(|| BlkioError::Format(input.to_owned()))?;
    if !path.starts_with("/dev/") {
        return Err(BlkioError::DevicePath(input.to_owned()));
    }
    Ok((path, value))
}

fn parse_weight(input: &str, value: &str) -> Result<u16> {
    match value.parse::<u16>() {
        Ok(weight) if weight == 0 || (10..=1000).contains(&weight) => Ok(weight),
        _ => Err(BlkioError::Weight(input.to_owned())),
    }
}

/// Parses a byte rate such as `10`, `1.5m` or `20MiB`. Units are binary.
pub fn parse_rate(value: &str) -> Option<u64> {
    let captures = RATE_RE.captures(value)?;
    let number: f64 = captures.get(1)?.as_str().parse().ok()?;
    let shift = match captures.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        None => 0,
        Some(unit) => match unit.as_str() {
            "k" => 10,
            "m" => 20,
            "g" => 30,
            "t" => 40,
            "p" => 50,
            _ => return None,
        },
    };
    Some((number * (1u64 << shift) as f64) as u64)
}

fn weight_device(input: &str, host: &dyn HostInfo) -> Result<LinuxWeightDevice> {
    let (path, value) = split_device(input)?;
    let weight = parse_weight(input, value)?;
    let device = host.device(Path::new(path))?;
    Ok(LinuxWeightDeviceBuilder::default()
        .major(device.major)
        .minor(device.minor)
        .weight(weight)
        .build()?)
}

fn throttle_device(
    input: &str,
    host: &dyn HostInfo,
    parse: fn(&str) -> Option<u64>,
) -> Result<LinuxThrottleDevice> {
    let (path, value) = split_device(input)?;
    let rate = parse(value).ok_or_else(|| BlkioError::Rate(input.to_owned()))?;
    let device = host.device(Path::new(path))?;
    Ok(LinuxThrottleDeviceBuilder::default()
        .major(device.major)
        .minor(device.minor)
        .rate(rate)
        .build()?)
}

fn throttle_devices(
    inputs: &[String],
    host: &dyn HostInfo,
    parse: fn(&str) -> Option<u64>,
) -> Result<Vec<LinuxThrottleDevice>> {
    inputs
        .iter()
        .map(|input| throttle_device(input, host, parse))
        .collect()
}

fn parse_iops(value: &str) -> Option<u64> {
    value.parse().ok()
}

/// Block IO weight and throttling. `None` when nothing was requested.
pub(crate) fn block_io(resources: &Resources, host: &dyn HostInfo) -> Result<Option<LinuxBlockIo>> {
    let mut builder = LinuxBlockIoBuilder::default();
    let mut any = false;

    if resources.blkio_weight > 0 {
        builder = builder.weight(resources.blkio_weight);
        any = true;
    }
    if !resources.blkio_weight_device.is_empty() {
        let devices = resources
            .blkio_weight_device
            .iter()
            .map(|input| weight_device(input, host))
            .collect::<Result<Vec<_>>>()?;
        builder = builder.weight_device(devices);
        any = true;
    }
    if !resources.device_read_bps.is_empty() {
        builder = builder.throttle_read_bps_device(throttle_devices(
            &resources.device_read_bps,
            host,
            parse_rate,
        )?);
        any = true;
    }
    if !resources.device_write_bps.is_empty() {
        builder = builder.throttle_write_bps_device(throttle_devices(
            &resources.device_write_bps,
            host,
            parse_rate,
        )?);
        any = true;
    }
    if !resources.device_read_iops.is_empty() {
        builder = builder.throttle_read_iops_device(throttle_devices(
            &resources.device_read_iops,
            host,
            parse_iops,
        )?);
        any = true;
    }
    if !resources.device_write_iops.is_empty() {
        builder = builder.throttle_write_iops_device(throttle_devices(
            &resources.device_write_iops,
            host,
            parse_iops,
        )?);
        any = true;
    }

    if !any {
        return Ok(None);
    }
    Ok(Some(builder.build()?))
}
