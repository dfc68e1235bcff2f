//! Priority flow control validation and application through lldptool.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, instrument, warn};

use crate::error::{DiscoverError, FailurePolicy, Result};
use crate::exec::{command_line, exec_or_throw};

/// Default name of the LLDP agent control tool.
pub const LLDPTOOL_BINARY: &str = "lldptool";

/// Sentinel accepted as "PFC off" and passed to the tool to disable PFC.
pub const PFC_DISABLE: &str = "none";

/// Set of PFC priorities in 0-7.
///
/// Rendered as the ascending comma-joined list, `""` when empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct PfcPriorities(u8);

impl PfcPriorities {
    /// Highest valid priority.
    pub const MAX_PRIORITY: u8 = 7;

    /// Most values accepted in one list.
    pub const MAX_VALUES: usize = 8;

    /// The empty set, PFC disabled.
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Adds a priority. Returns false if it is out of range.
    pub fn insert(&mut self, priority: u8) -> bool {
        if priority > Self::MAX_PRIORITY {
            return false;
        }
        self.0 |= 1 << priority;
        true
    }

    pub const fn contains(&self, priority: u8) -> bool {
        priority <= Self::MAX_PRIORITY && self.0 & (1 << priority) != 0
    }

    /// Priorities in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..=Self::MAX_PRIORITY).filter(|p| self.contains(*p))
    }
}

impl FromStr for PfcPriorities {
    type Err = DiscoverError;

    fn from_str(s: &str) -> Result<Self> {
        let tokens: Vec<&str> = s.trim().split(',').collect();

        if tokens.len() == 1 && (tokens[0].is_empty() || tokens[0] == PFC_DISABLE) {
            return Ok(Self::empty());
        }

        if tokens.len() > Self::MAX_VALUES {
            return Err(DiscoverError::PfcCount(tokens.len()));
        }

        let mut priorities = Self::empty();
        for token in tokens {
            let token = token.trim();
            let value: i64 = token.parse().map_err(|e| {
                DiscoverError::PfcValue(format!("PFC value '{token}' is not a number: {e}"))
            })?;
            match u8::try_from(value) {
                Ok(priority) if priority <= Self::MAX_PRIORITY => {
                    priorities.insert(priority);
                }
                _ => {
                    return Err(DiscoverError::PfcValue(format!(
                        "PFC value {value} not in range 0-{}",
                        Self::MAX_PRIORITY
                    )));
                }
            }
        }

        Ok(priorities)
    }
}

impl fmt::Display for PfcPriorities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for priority in self.iter() {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{priority}")?;
            first = false;
        }
        Ok(())
    }
}

/// Validates a PFC priority list and returns its canonical form.
///
/// ```
/// use scaleout_discover::pfc::verify_pfc_argument;
///
/// assert_eq!(verify_pfc_argument(" 7,5,3, 6,4").unwrap(), "3,4,5,6,7");
/// assert_eq!(verify_pfc_argument("none").unwrap(), "");
/// assert!(verify_pfc_argument("8").is_err());
/// ```
pub fn verify_pfc_argument(pfc: &str) -> Result<String> {
    Ok(pfc.parse::<PfcPriorities>()?.to_string())
}

/// Resolved location of the lldptool binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LldpTool {
    path: PathBuf,
}

impl LldpTool {
    /// Resolves `binary` through the search path.
    pub fn lookup(binary: &str) -> Result<Self> {
        let path = which::which(binary).map_err(|e| DiscoverError::ToolNotFound {
            tool: binary.to_string(),
            source: e,
        })?;
        info!(path = %path.display(), "Found lldptool");
        Ok(Self { path })
    }

    /// Uses `path` as is.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs the tool and returns its stdout. A non-zero exit is an error.
    pub async fn run(&self, args: &[&str]) -> Result<String> {
        exec_or_throw(&self.path, args).await
    }
}

/// Applies PFC settings to links.
#[derive(Debug, Clone)]
pub struct PfcController {
    tool: LldpTool,
}

impl PfcController {
    /// The first failing interface aborts the batch.
    pub const POLICY: FailurePolicy = FailurePolicy::FailFast;

    pub fn new(tool: LldpTool) -> Self {
        Self { tool }
    }

    /// Enables PFC admin status on `ifname`, then sets the enabled
    /// priorities (`none` to disable).
    #[instrument(skip(self))]
    pub async fn exec_pfc(&self, ifname: &str, enabled: &str) -> Result<()> {
        let admin_args = ["-L", "-i", ifname, "adminStatus=rxtx"];
        self.run_logged(&admin_args).await?;

        let enabled = format!("enabled={enabled}");
        let pfc_args = ["-T", "-i", ifname, "-V", "PFC", "enableTx=yes", enabled.as_str()];
        self.run_logged(&pfc_args).await
    }

    async fn run_logged(&self, args: &[&str]) -> Result<()> {
        let command = command_line(self.tool.path(), args);
        match self.tool.run(args).await {
            Ok(_) => {
                info!(command = %command, "Successfully ran command");
                Ok(())
            }
            Err(e) => {
                warn!(command = %command, error = %e, "Failed to run command");
                Err(e)
            }
        }
    }

    /// Enables `priorities` on every interface in order.
    pub async fn enable_all<'n, I>(&self, priorities: PfcPriorities, ifnames: I) -> Result<()>
    where
        I: IntoIterator<Item = &'n str>,
    {
        let enabled = priorities.to_string();
        for ifname in ifnames {
            if let Err(e) = self.exec_pfc(ifname, &enabled).await {
                Self::POLICY.on_error(e)?;
                continue;
            }
            debug!(ifname = %ifname, pfc = %enabled, "Enabled PFC");
        }
        Ok(())
    }

    /// Disables PFC on every interface in order.
    pub async fn disable_all<'n, I>(&self, ifnames: I) -> Result<()>
    where
        I: IntoIterator<Item = &'n str>,
    {
        for ifname in ifnames {
            if let Err(e) = self.exec_pfc(ifname, PFC_DISABLE).await {
                Self::POLICY.on_error(e)?;
                continue;
            }
            debug!(ifname = %ifname, "Disabled PFC");
        }
        Ok(())
    }

    /// Enables `priorities`, or disables PFC when the set is empty.
    pub async fn apply<'n, I>(&self, priorities: PfcPriorities, ifnames: I) -> Result<()>
    where
        I: IntoIterator<Item = &'n str>,
    {
        if priorities.is_empty() {
            self.disable_all(ifnames).await
        } else {
            self.enable_all(priorities, ifnames).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_pfc_argument() {
        let cases: &[(&str, Option<&str>)] = &[
            ("0,1", Some("0,1")),
            ("6", Some("6")),
            ("foo,bar", None),
            (" 1, 5 ,  7 ", Some("1,5,7")),
            ("2,6,3,bar", None),
            ("10,1,3", None),
            ("9", None),
            ("-9", None),
            ("1,2,-42", None),
            ("7,5,3,6,4", Some("3,4,5,6,7")),
            ("", Some("")),
            ("  ", Some("")),
            ("none", Some("")),
            ("3,3,1", Some("1,3")),
            ("0,1,2,3,4,5,6,7", Some("0,1,2,3,4,5,6,7")),
        ];

        for (input, expected) in cases {
            let result = verify_pfc_argument(input);
            match expected {
                Some(want) => assert_eq!(result.unwrap(), *want, "input {input:?}"),
                None => assert!(result.is_err(), "input {input:?} should fail"),
            }
        }
    }

    #[test]
    fn test_verify_too_many_values() {
        match verify_pfc_argument("0,1,2,3,4,5,6,7,0") {
            Err(DiscoverError::PfcCount(count)) => assert_eq!(count, 9),
            other => panic!("Expected PfcCount error, got {:?}", other),
        }
        // Counted before the values are looked at.
        assert!(matches!(
            verify_pfc_argument("a,b,c,d,e,f,g,h,i"),
            Err(DiscoverError::PfcCount(9))
        ));
    }

    #[test]
    fn test_verify_value_errors() {
        assert!(matches!(
            verify_pfc_argument("2,6,3,bar"),
            Err(DiscoverError::PfcValue(_))
        ));
        assert!(matches!(
            verify_pfc_argument("8"),
            Err(DiscoverError::PfcValue(_))
        ));
        // A lone empty token disables, an empty token in a list does not.
        assert!(verify_pfc_argument("1,,2").is_err());
        assert!(verify_pfc_argument("none,1").is_err());
    }

    #[test]
    fn test_priorities_bitset() {
        let mut priorities = PfcPriorities::empty();
        assert!(priorities.is_empty());
        assert_eq!(priorities.to_string(), "");
        assert!(priorities.insert(5));
        assert!(priorities.insert(0));
        assert!(!priorities.insert(8));
        assert!(priorities.contains(5));
        assert!(!priorities.contains(8));
        assert_eq!(priorities.iter().collect::<Vec<_>>(), vec![0, 5]);
        assert_eq!(priorities.to_string(), "0,5");
    }

    #[test]
    fn test_lookup_missing_tool() {
        let err = LldpTool::lookup("no-such-lldptool-binary").unwrap_err();
        assert!(matches!(err, DiscoverError::ToolNotFound { .. }));
    }

    #[test]
    fn test_policy_is_fail_fast() {
        assert_eq!(PfcController::POLICY, FailurePolicy::FailFast);
    }

    #[tokio::test]
    async fn test_exec_pfc_true() {
        let controller = PfcController::new(LldpTool::lookup("true").unwrap());
        controller.exec_pfc("ens1", "0,1").await.unwrap();

        let priorities: PfcPriorities = "3,4".parse().unwrap();
        controller
            .enable_all(priorities, ["ens1", "ens2"])
            .await
            .unwrap();
        controller.disable_all(["ens1", "ens2"]).await.unwrap();
        controller
            .apply(PfcPriorities::empty(), ["ens1"])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_exec_pfc_false() {
        let controller = PfcController::new(LldpTool::lookup("false").unwrap());
        assert!(controller.exec_pfc("ens1", "0,1").await.is_err());
    }

    #[tokio::test]
    async fn test_enable_all_fails_fast() {
        let controller = PfcController::new(LldpTool::lookup("false").unwrap());
        let priorities: PfcPriorities = "3".parse().unwrap();
        match controller.enable_all(priorities, ["ens1", "ens2"]).await {
            Err(DiscoverError::CommandFailed { command, .. }) => {
                assert!(command.contains("-i ens1"), "{command}");
                assert!(command.contains("adminStatus=rxtx"), "{command}");
            }
            other => panic!("Expected CommandFailed error, got {:?}", other),
        }
        assert!(controller.disable_all(["ens1"]).await.is_err());
    }

    /// An lldptool stand-in that records its arguments and rejects `-T`.
    fn tlv_rejecting_tool(dir: &Path) -> LldpTool {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("lldptool");
        std::fs::write(
            &path,
            "#!/bin/sh\n\
             echo \"$@\" >> \"$(dirname \"$0\")/calls\"\n\
             if [ \"$1\" = \"-T\" ]; then echo 'PFC TLV not supported' >&2; exit 3; fi\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        LldpTool::from_path(path)
    }

    #[tokio::test]
    async fn test_enable_all_fails_on_priority_step() {
        let dir = tempfile::tempdir().unwrap();
        let controller = PfcController::new(tlv_rejecting_tool(dir.path()));
        let priorities: PfcPriorities = "3".parse().unwrap();

        match controller.enable_all(priorities, ["ens1", "ens2"]).await {
            Err(DiscoverError::CommandFailed {
                command, exit_code, ..
            }) => {
                assert_eq!(exit_code, 3);
                assert!(command.contains("-T -i ens1"), "{command}");
                assert!(command.contains("enabled=3"), "{command}");
            }
            other => panic!("Expected CommandFailed error, got {:?}", other),
        }

        let calls = std::fs::read_to_string(dir.path().join("calls")).unwrap();
        assert_eq!(
            calls.lines().collect::<Vec<_>>(),
            vec![
                "-L -i ens1 adminStatus=rxtx",
                "-T -i ens1 -V PFC enableTx=yes enabled=3",
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_interface_list() {
        let controller = PfcController::new(LldpTool::from_path("/nonexistent/lldptool"));
        controller.disable_all(Vec::<&str>::new()).await.unwrap();
    }
}
