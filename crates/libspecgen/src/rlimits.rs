use std::str::FromStr;

use oci_spec::runtime::LinuxRlimitType;
use oci_spec::OciSpecError;

use crate::generator::Generator;
use crate::host::{HostError, HostInfo};

/// Highest NOFILE/NPROC value settable without raising a sysctl.
pub const KERNEL_MAX_RLIMIT: u64 = 1048576;
/// The ulimit entry that copies every limit from the host.
pub const HOST_ULIMIT: &str = "host";

#[derive(Debug, thiserror::Error)]
pub enum RlimitError {
    #[error("ulimit can use host only once")]
    HostNotAlone,
    #[error("ulimit option {input:?} requires name=SOFT:HARD, failed to be parsed")]
    Parse {
        input: String,
        source: UlimitParseError,
    },
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    OciSpec(#[from] OciSpecError),
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum UlimitParseError {
    #[error("expected name=value")]
    MissingValue,
    #[error("invalid ulimit type {0:?}")]
    UnknownName(String),
    #[error("too many limit value arguments")]
    TooManyValues,
    #[error("invalid limit value {0:?}")]
    InvalidValue(String),
    #[error("soft limit {soft} must be less than or equal to hard limit {hard}")]
    SoftAboveHard { soft: i64, hard: i64 },
}

/// A parsed `name=soft[:hard]` entry. A value of `-1` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ulimit {
    pub typ: LinuxRlimitType,
    pub soft: u64,
    pub hard: u64,
}

fn rlimit_type(name: &str) -> Option<LinuxRlimitType> {
    let typ = match name {
        "core" => LinuxRlimitType::RlimitCore,
        "cpu" => LinuxRlimitType::RlimitCpu,
        "data" => LinuxRlimitType::RlimitData,
        "fsize" => LinuxRlimitType::RlimitFsize,
        "locks" => LinuxRlimitType::RlimitLocks,
        "memlock" => LinuxRlimitType::RlimitMemlock,
        "msgqueue" => LinuxRlimitType::RlimitMsgqueue,
        "nice" => LinuxRlimitType::RlimitNice,
        "nofile" => LinuxRlimitType::RlimitNofile,
        "nproc" => LinuxRlimitType::RlimitNproc,
        "rss" => LinuxRlimitType::RlimitRss,
        "rtprio" => LinuxRlimitType::RlimitRtprio,
        "rttime" => LinuxRlimitType::RlimitRttime,
        "sigpending" => LinuxRlimitType::RlimitSigpending,
        "stack" => LinuxRlimitType::RlimitStack,
        _ => return None,
    };
    Some(typ)
}

fn parse_limit(value: &str) -> Result<i64, UlimitParseError> {
    match value.parse::<i64>() {
        Ok(limit) if limit >= -1 => Ok(limit),
        _ => Err(UlimitParseError::InvalidValue(value.to_owned())),
    }
}

fn to_rlim(limit: i64) -> u64 {
    u64::try_from(limit).unwrap_or(u64::MAX)
}

impl FromStr for Ulimit {
    type Err = UlimitParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, values) = s.split_once('=').ok_or(UlimitParseError::MissingValue)?;
        let typ = rlimit_type(name).ok_or_else(|| UlimitParseError::UnknownName(name.to_owned()))?;

        let mut parts = values.split(':');
        let soft = parse_limit(parts.next().unwrap_or_default())?;
        let hard = match parts.next() {
            Some(hard) => parse_limit(hard)?,
            None => soft,
        };
        if parts.next().is_some() {
            return Err(UlimitParseError::TooManyValues);
        }
        if hard != -1 && (soft == -1 || soft > hard) {
            return Err(UlimitParseError::SoftAboveHard { soft, hard });
        }

        Ok(Ulimit {
            typ,
            soft: to_rlim(soft),
            hard: to_rlim(hard),
        })
    }
}

/// Applies the configured ulimits. Unless rootless, NOFILE and NPROC are
/// raised to [`KERNEL_MAX_RLIMIT`] when not given explicitly.
pub(crate) fn apply_rlimits(
    ulimits: &[String],
    rootless: bool,
    host: &dyn HostInfo,
    generator: &mut Generator,
) -> Result<(), RlimitError> {
    let mut nofile_set = false;
    let mut nproc_set = false;

    if ulimits.iter().any(|u| u == HOST_ULIMIT) {
        if ulimits.len() != 1 {
            return Err(RlimitError::HostNotAlone);
        }
        for limit in host.rlimits()? {
            generator.add_rlimit(limit.typ, limit.hard, limit.soft)?;
        }
        nofile_set = true;
        nproc_set = true;
    } else {
        for input in ulimits {
            let ulimit: Ulimit = input.parse().map_err(|source| RlimitError::Parse {
                input: input.clone(),
                source,
            })?;
            match ulimit.typ {
                LinuxRlimitType::RlimitNofile => nofile_set = true,
                LinuxRlimitType::RlimitNproc => nproc_set = true,
                _ => {}
            }
            generator.add_rlimit(ulimit.typ, ulimit.hard, ulimit.soft)?;
        }
    }

    if !rootless {
        if !nofile_set {
            generator.add_rlimit(LinuxRlimitType::RlimitNofile, KERNEL_MAX_RLIMIT, KERNEL_MAX_RLIMIT)?;
        }
        if !nproc_set {
            generator.add_rlimit(LinuxRlimitType::RlimitNproc, KERNEL_MAX_RLIMIT, KERNEL_MAX_RLIMIT)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use quickcheck::quickcheck;

    use super::*;
    use crate::test_utils::FakeHost;

    fn limit(g: &Generator, typ: LinuxRlimitType) -> Option<(u64, u64)> {
        g.rlimits
            .iter()
            .find(|r| r.typ() == typ)
            .map(|r| (r.soft(), r.hard()))
    }

    #[test]
    fn test_parse_ulimit() -> Result<()> {
        assert_eq!(
            "nofile=1024:2048".parse::<Ulimit>()?,
            Ulimit {
                typ: LinuxRlimitType::RlimitNofile,
                soft: 1024,
                hard: 2048
            }
        );
        let core: Ulimit = "core=-1".parse()?;
        assert_eq!((core.soft, core.hard), (u64::MAX, u64::MAX));
        let stack: Ulimit = "stack=8192:-1".parse()?;
        assert_eq!((stack.soft, stack.hard), (8192, u64::MAX));
        Ok(())
    }

    #[test]
    fn test_parse_ulimit_errors() {
        assert_eq!("nofile".parse::<Ulimit>(), Err(UlimitParseError::MissingValue));
        assert_eq!(
            "files=1".parse::<Ulimit>(),
            Err(UlimitParseError::UnknownName("files".to_owned()))
        );
        assert_eq!(
            "nofile=1:2:3".parse::<Ulimit>(),
            Err(UlimitParseError::TooManyValues)
        );
        assert_eq!(
            "nofile=x".parse::<Ulimit>(),
            Err(UlimitParseError::InvalidValue("x".to_owned()))
        );
        assert_eq!(
            "nofile=-2".parse::<Ulimit>(),
            Err(UlimitParseError::InvalidValue("-2".to_owned()))
        );
        assert_eq!(
            "nofile=10:5".parse::<Ulimit>(),
            Err(UlimitParseError::SoftAboveHard { soft: 10, hard: 5 })
        );
        assert_eq!(
            "nofile=-1:5".parse::<Ulimit>(),
            Err(UlimitParseError::SoftAboveHard { soft: -1, hard: 5 })
        );
    }

    quickcheck! {
        fn prop_ordered_limits_parse(a: u32, b: u32) -> bool {
            let (soft, hard) = (a.min(b), a.max(b));
            let parsed: Result<Ulimit, _> = format!("nproc={soft}:{hard}").parse();
            parsed == Ok(Ulimit {
                typ: LinuxRlimitType::RlimitNproc,
                soft: u64::from(soft),
                hard: u64::from(hard),
            })
        }
    }

    #[test]
    fn test_root_defaults_raise_nofile_and_nproc() -> Result<()> {
        let mut g = Generator::new()?;
        apply_rlimits(&["core=0".to_owned()], false, &FakeHost::default(), &mut g)?;
        assert_eq!(limit(&g, LinuxRlimitType::RlimitCore), Some((0, 0)));
        assert_eq!(
            limit(&g, LinuxRlimitType::RlimitNofile),
            Some((KERNEL_MAX_RLIMIT, KERNEL_MAX_RLIMIT))
        );
        assert_eq!(
            limit(&g, LinuxRlimitType::RlimitNproc),
            Some((KERNEL_MAX_RLIMIT, KERNEL_MAX_RLIMIT))
        );
        Ok(())
    }

    #[test]
    fn test_explicit_nofile_wins() -> Result<()> {
        let mut g = Generator::new()?;
        apply_rlimits(&["nofile=100:200".to_owned()], false, &FakeHost::default(), &mut g)?;
        assert_eq!(limit(&g, LinuxRlimitType::RlimitNofile), Some((100, 200)));
        Ok(())
    }

    #[test]
    fn test_rootless_keeps_defaults() -> Result<()> {
        let mut g = Generator::new()?;
        apply_rlimits(&[], true, &FakeHost::default(), &mut g)?;
        assert_eq!(limit(&g, LinuxRlimitType::RlimitNofile), Some((1024, 1024)));
        assert_eq!(limit(&g, LinuxRlimitType::RlimitNproc), None);
        Ok(())
    }

    #[test]
    fn test_host_ulimit_copies_host_limits() -> Result<()> {
        let host = FakeHost::default();
        let mut g = Generator::new()?;
        apply_rlimits(&[HOST_ULIMIT.to_owned()], false, &host, &mut g)?;
        for expected in &host.rlimits {
            assert_eq!(limit(&g, expected.typ), Some((expected.soft, expected.hard)));
        }
        Ok(())
    }

    #[test]
    fn test_host_ulimit_must_be_alone() -> Result<()> {
        let mut g = Generator::new()?;
        let err = apply_rlimits(
            &[HOST_ULIMIT.to_owned(), "nofile=1".to_owned()],
            false,
            &FakeHost::default(),
            &mut g,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "ulimit can use host only once");
        Ok(())
    }

    #[test]
    fn test_parse_error_echoes_input() -> Result<()> {
        let mut g = Generator::new()?;
        let err = apply_rlimits(&["nofile=a".to_owned()], false, &FakeHost::default(), &mut g)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "ulimit option \"nofile=a\" requires name=SOFT:HARD, failed to be parsed"
        );
        Ok(())
    }
}
