use chunkbox_core::access::{evaluate, Decision, Reason, Role};
use chunkbox_core::audit::{self, MemoryAudit};
use chunkbox_core::manifest::{self, ChunkManifest, ChunkRecord};
use chunkbox_core::share::{update_sharing, ShareChange};
use chunkbox_core::workspace::Workspace;
use chunkbox_core::Error;
use std::fs;

fn shared_manifest() -> ChunkManifest {
    let mut mf = ChunkManifest::new(
        "alice",
        vec![ChunkRecord { name: "f.chunk1".into(), crc32: "3610A686".into(), size: Some(5) }],
    );
    mf.grant("bob");
    mf
}

#[test]
fn evaluation_order_is_admin_owner_shared() {
    let mf = shared_manifest();
    assert_eq!(evaluate("carol", Role::Admin, &mf), Decision::Allowed(Reason::AdminOverride));
    assert_eq!(evaluate("alice", Role::Admin, &mf), Decision::Allowed(Reason::AdminOverride));
    assert_eq!(evaluate("alice", Role::User, &mf), Decision::Allowed(Reason::Owner));
    assert_eq!(evaluate("bob", Role::User, &mf), Decision::Allowed(Reason::AllowedUser));
    assert_eq!(evaluate("carol", Role::User, &mf), Decision::Denied);
    assert_eq!(evaluate("Alice", Role::User, &mf), Decision::Denied);
}

#[test]
fn decisions_render_for_display() {
    let mf = shared_manifest();
    assert_eq!(evaluate("bob", Role::User, &mf).to_string(), "ALLOWED (shared)");
    assert_eq!(evaluate("eve", Role::User, &mf).to_string(), "DENIED");
    assert_eq!("ADMIN".parse::<Role>(), Ok(Role::Admin));
    assert!("root".parse::<Role>().is_err());
}

fn write(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
    let p = dir.join(name);
    fs::write(&p, body).unwrap();
    p
}

#[test]
fn load_accepts_missing_allowed_users() {
    let tmp = tempfile::tempdir().unwrap();
    let p = write(
        tmp.path(),
        "a.meta.json",
        r#"{"totalChunks":1,"chunks":[{"name":"a.chunk1","crc32":"cbf43926"}],"owner":"alice"}"#,
    );
    let mf = manifest::load(&p).unwrap();
    assert!(mf.allowed_users.is_empty());
    assert_eq!(mf.chunks[0].size, None);
}

#[test]
fn load_rejects_malformed_manifests() {
    let tmp = tempfile::tempdir().unwrap();
    let cases = [
        ("not json", "{"),
        ("count", r#"{"totalChunks":2,"chunks":[{"name":"a.chunk1","crc32":"00000000"}],"owner":"a"}"#),
        ("crc", r#"{"totalChunks":1,"chunks":[{"name":"a.chunk1","crc32":"xyz"}],"owner":"a"}"#),
        ("owner", r#"{"totalChunks":0,"chunks":[],"owner":" "}"#),
        ("name", r#"{"totalChunks":1,"chunks":[{"name":"../a","crc32":"00000000"}],"owner":"a"}"#),
        (
            "dup",
            r#"{"totalChunks":2,"chunks":[{"name":"a","crc32":"00000000"},{"name":"a","crc32":"00000000"}],"owner":"a"}"#,
        ),
        ("missing field", r#"{"chunks":[],"owner":"a"}"#),
    ];
    for (label, body) in cases {
        let p = write(tmp.path(), "m.meta.json", body);
        let err = manifest::load(&p).unwrap_err();
        assert!(matches!(err, Error::MalformedManifest { .. }), "{label}: {err}");
    }
    let p = write(tmp.path(), "o.meta.json", r#"{"totalChunks":0,"chunks":[]}"#);
    let err = manifest::load(&p).unwrap_err();
    assert!(err.to_string().contains("owner"), "{err}");

    fs::write(tmp.path().join("bin.meta.json"), [0xFFu8, 0xFE, 0x00]).unwrap();
    assert!(matches!(
        manifest::load(&tmp.path().join("bin.meta.json")),
        Err(Error::MalformedManifest { .. })
    ));
    assert!(matches!(
        manifest::load(&tmp.path().join("absent.meta.json")),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn save_is_pretty_and_leaves_no_temp_file() {
    let tmp = tempfile::tempdir().unwrap();
    let p = tmp.path().join("f.meta.json");
    let mf = shared_manifest();
    manifest::save(&p, &mf).unwrap();
    let text = fs::read_to_string(&p).unwrap();
    assert!(text.contains("\"allowedUsers\": [\n    \"bob\"\n  ]"), "{text}");
    assert!(text.ends_with('\n'));
    assert_eq!(manifest::load(&p).unwrap(), mf);
    let names: Vec<_> = fs::read_dir(tmp.path()).unwrap().map(|e| e.unwrap().file_name()).collect();
    assert_eq!(names.len(), 1);
}

fn owned_workspace() -> (tempfile::TempDir, Workspace) {
    let tmp = tempfile::tempdir().unwrap();
    let ws = Workspace::new(tmp.path().join("ws"));
    ws.ensure().unwrap();
    let mf = ChunkManifest::new("alice", vec![]);
    manifest::save(&ws.root().join("f.meta.json"), &mf).unwrap();
    (tmp, ws)
}

#[test]
fn owner_grants_and_revokes() {
    let (_tmp, ws) = owned_workspace();
    let sink = MemoryAudit::default();

    let (mf, changed) =
        update_sharing(&ws, "f", "alice", Role::User, "bob", ShareChange::Grant, &sink).unwrap();
    assert!(changed);
    assert_eq!(mf.allowed_users, ["bob"]);
    let (_, changed) =
        update_sharing(&ws, "f", "alice", Role::User, "bob", ShareChange::Grant, &sink).unwrap();
    assert!(!changed);

    let on_disk = manifest::load(&ws.root().join("f.meta.json")).unwrap();
    assert_eq!(evaluate("bob", Role::User, &on_disk), Decision::Allowed(Reason::AllowedUser));

    let (mf, changed) =
        update_sharing(&ws, "f", "alice", Role::User, "bob", ShareChange::Revoke, &sink).unwrap();
    assert!(changed);
    assert!(mf.allowed_users.is_empty());

    let shared: Vec<_> =
        sink.events().into_iter().filter(|e| e.action == audit::FILE_SHARED).collect();
    assert_eq!(shared.len(), 2);
    assert_eq!(shared[0].target_file.as_deref(), Some("f"));
}

#[test]
fn only_owner_or_admin_may_share() {
    let (_tmp, ws) = owned_workspace();
    let sink = MemoryAudit::default();
    update_sharing(&ws, "f", "alice", Role::User, "bob", ShareChange::Grant, &sink).unwrap();

    let err = update_sharing(&ws, "f", "bob", Role::User, "carol", ShareChange::Grant, &sink)
        .unwrap_err();
    assert!(matches!(err, Error::AccessDenied { ref identity, .. } if identity == "bob"));
    let err = update_sharing(&ws, "f", "mallory", Role::User, "mallory", ShareChange::Grant, &sink)
        .unwrap_err();
    assert!(matches!(err, Error::AccessDenied { .. }));

    let (mf, changed) =
        update_sharing(&ws, "f", "root", Role::Admin, "carol", ShareChange::Grant, &sink).unwrap();
    assert!(changed);
    assert_eq!(mf.allowed_users, ["bob", "carol"]);
}

#[test]
fn sharing_unknown_file_is_not_found() {
    let (_tmp, ws) = owned_workspace();
    let sink = MemoryAudit::default();
    let err = update_sharing(&ws, "ghost", "alice", Role::User, "bob", ShareChange::Grant, &sink)
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "{err}");
}
