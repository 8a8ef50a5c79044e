use crate::access::{self, Decision, Reason, Role};
use crate::audit::{self, AuditEvent, AuditSink};
use crate::error::{Error, Result};
use crate::lock::BaseLock;
use crate::manifest::{self, ChunkManifest};
use crate::workspace::Workspace;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShareChange {
    Grant,
    Revoke,
}

/// Add or remove `grantee` on the access list of `<base>.meta.json`.
/// Only the owner or an admin may change it; a shared user may not reshare.
/// Returns the manifest as saved and whether anything changed.
pub fn update_sharing(
    ws: &Workspace,
    base: &str,
    identity: &str,
    role: Role,
    grantee: &str,
    change: ShareChange,
    sink: &dyn AuditSink,
) -> Result<(ChunkManifest, bool)> {
    let path = ws.resolve_flat(&manifest::manifest_name(base))?;
    let _lock = BaseLock::acquire(ws, base)?;
    let mut mf = manifest::load(&path)?;
    match access::evaluate(identity, role, &mf) {
        Decision::Allowed(Reason::AdminOverride | Reason::Owner) => {}
        _ => {
            return Err(Error::AccessDenied { identity: identity.to_string(), file: base.to_string() })
        }
    }
    let changed = match change {
        ShareChange::Grant => mf.grant(grantee),
        ShareChange::Revoke => mf.revoke(grantee),
    };
    if changed {
        manifest::save(&path, &mf)?;
        tracing::info!(base, grantee, ?change, "access list updated");
        audit::emit(
            sink,
            AuditEvent::new(identity, audit::FILE_SHARED, format!("{change:?} {grantee}")).target(base),
        );
    }
    Ok((mf, changed))
}
