//! Root requirement for actions that touch the system.

use crate::error::{InstallError, Result};
use crate::orchestrator::Action;

/// Fail unless the caller may run `action`.
///
/// Dry runs and `clean` never need root.
pub fn check_privileges(action: Action, dry_run: bool, is_root: bool) -> Result<()> {
    if is_root || dry_run || action == Action::Clean {
        return Ok(());
    }
    Err(InstallError::PrivilegeRequired {
        action: action.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privilege_rules() {
        assert!(check_privileges(Action::Install, false, true).is_ok());
        assert!(check_privileges(Action::Install, true, false).is_ok());
        assert!(check_privileges(Action::Clean, false, false).is_ok());
        assert!(matches!(
            check_privileges(Action::Prepare, false, false),
            Err(InstallError::PrivilegeRequired { .. })
        ));
        assert!(check_privileges(Action::Uninstall, false, false).is_err());
    }
}
