//! Per-interface driver statistics.

use std::collections::HashMap;

use crate::error::Result;
#[cfg(not(target_os = "linux"))]
use crate::error::DiscoverError;

/// Source of raw driver counters, keyed by the driver's statistic name.
#[cfg_attr(test, mockall::automock)]
pub trait StatsSource: Send + Sync {
    /// Reads all counters of `ifname`.
    fn stats(&self, ifname: &str) -> Result<HashMap<String, u64>>;
}

/// Reads driver statistics through the ethtool ioctl, as `ethtool -S` does.
#[derive(Debug, Default, Clone, Copy)]
pub struct EthtoolStats;

impl EthtoolStats {
    pub fn new() -> Self {
        Self
    }
}

impl StatsSource for EthtoolStats {
    #[cfg(target_os = "linux")]
    fn stats(&self, ifname: &str) -> Result<HashMap<String, u64>> {
        ethtool::read_stats(ifname)
    }

    #[cfg(not(target_os = "linux"))]
    fn stats(&self, ifname: &str) -> Result<HashMap<String, u64>> {
        Err(DiscoverError::statistics(
            ifname,
            "ethtool statistics are only available on Linux",
        ))
    }
}

#[cfg(target_os = "linux")]
mod ethtool {
    use super::*;
    use crate::error::DiscoverError;
    use nix::sys::socket::{AddressFamily, SockFlag, SockType, socket};
    use std::os::fd::{AsRawFd, OwnedFd};

    const SIOCETHTOOL: u32 = 0x8946;
    const ETHTOOL_GDRVINFO: u32 = 0x0000_0003;
    const ETHTOOL_GSTRINGS: u32 = 0x0000_001b;
    const ETHTOOL_GSTATS: u32 = 0x0000_001d;
    const ETH_SS_STATS: u32 = 1;
    const ETH_GSTRING_LEN: usize = 32;

    /// Upper bound on the counters a driver may report.
    const MAX_STATS: u32 = 1 << 14;

    /// `struct ifreq` with the `ifr_data` member of the union.
    #[allow(dead_code)]
    #[repr(C)]
    struct IfreqData {
        ifr_name: [libc::c_char; libc::IFNAMSIZ],
        ifr_data: *mut libc::c_void,
        _pad: [u8; 16],
    }

    /// `struct ethtool_drvinfo`.
    #[allow(dead_code)]
    #[repr(C)]
    struct EthtoolDrvinfo {
        cmd: u32,
        driver: [u8; 32],
        version: [u8; 32],
        fw_version: [u8; 32],
        bus_info: [u8; 32],
        erom_version: [u8; 32],
        reserved2: [u8; 12],
        n_priv_flags: u32,
        n_stats: u32,
        testinfo_len: u32,
        eedump_len: u32,
        regdump_len: u32,
    }

    pub(super) fn read_stats(ifname: &str) -> Result<HashMap<String, u64>> {
        if ifname.is_empty() || ifname.len() >= libc::IFNAMSIZ {
            return Err(DiscoverError::statistics(ifname, "invalid interface name"));
        }

        let fd = socket(
            AddressFamily::Inet,
            SockType::Datagram,
            SockFlag::SOCK_CLOEXEC,
            None,
        )
        .map_err(|e| DiscoverError::statistics(ifname, format!("socket: {e}")))?;

        let n_stats = stats_count(&fd, ifname)?;
        if n_stats == 0 {
            return Ok(HashMap::new());
        }

        let names = stat_names(&fd, ifname, n_stats)?;
        let values = stat_values(&fd, ifname, n_stats)?;
        Ok(names.into_iter().zip(values).collect())
    }

    fn ethtool_ioctl(fd: &OwnedFd, ifname: &str, data: *mut libc::c_void) -> Result<()> {
        let mut ifr = IfreqData {
            ifr_name: [0; libc::IFNAMSIZ],
            ifr_data: data,
            _pad: [0; 16],
        };
        for (dst, src) in ifr.ifr_name.iter_mut().zip(ifname.bytes()) {
            *dst = src as libc::c_char;
        }

        // SAFETY: ifr is a valid ifreq and ifr_data points to a buffer
        // sized for the command it carries.
        let ret = unsafe { libc::ioctl(fd.as_raw_fd(), SIOCETHTOOL as _, &mut ifr as *mut IfreqData) };
        if ret < 0 {
            return Err(DiscoverError::statistics(
                ifname,
                std::io::Error::last_os_error(),
            ));
        }
        Ok(())
    }

    fn stats_count(fd: &OwnedFd, ifname: &str) -> Result<u32> {
        let mut drvinfo = EthtoolDrvinfo {
            cmd: ETHTOOL_GDRVINFO,
            driver: [0; 32],
            version: [0; 32],
            fw_version: [0; 32],
            bus_info: [0; 32],
            erom_version: [0; 32],
            reserved2: [0; 12],
            n_priv_flags: 0,
            n_stats: 0,
            testinfo_len: 0,
            eedump_len: 0,
            regdump_len: 0,
        };
        ethtool_ioctl(fd, ifname, (&mut drvinfo as *mut EthtoolDrvinfo).cast())?;

        if drvinfo.n_stats > MAX_STATS {
            return Err(DiscoverError::statistics(
                ifname,
                format!("driver reports {} statistics", drvinfo.n_stats),
            ));
        }
        Ok(drvinfo.n_stats)
    }

    fn stat_names(fd: &OwnedFd, ifname: &str, n_stats: u32) -> Result<Vec<String>> {
        // struct ethtool_gstrings: cmd, string_set, len, then the strings.
        const HEADER: usize = 12;
        let count = n_stats as usize;
        let mut buf = vec![0u8; HEADER + count * ETH_GSTRING_LEN];
        buf[0..4].copy_from_slice(&ETHTOOL_GSTRINGS.to_ne_bytes());
        buf[4..8].copy_from_slice(&ETH_SS_STATS.to_ne_bytes());
        buf[8..12].copy_from_slice(&n_stats.to_ne_bytes());

        ethtool_ioctl(fd, ifname, buf.as_mut_ptr().cast())?;

        Ok(buf[HEADER..]
            .chunks_exact(ETH_GSTRING_LEN)
            .map(|raw| {
                let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
                String::from_utf8_lossy(&raw[..end]).into_owned()
            })
            .collect())
    }

    fn stat_values(fd: &OwnedFd, ifname: &str, n_stats: u32) -> Result<Vec<u64>> {
        // struct ethtool_stats: cmd, n_stats, then u64 values.
        let mut buf = vec![0u64; 1 + n_stats as usize];
        let mut header = [0u8; 8];
        header[0..4].copy_from_slice(&ETHTOOL_GSTATS.to_ne_bytes());
        header[4..8].copy_from_slice(&n_stats.to_ne_bytes());
        buf[0] = u64::from_ne_bytes(header);

        ethtool_ioctl(fd, ifname, buf.as_mut_ptr().cast())?;

        Ok(buf.split_off(1))
    }

}
