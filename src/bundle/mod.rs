//! Export bundles.
//!
//! A bundle is a gzip-compressed tarball:
//!
//! ```text
//! manifest.json
//! sessions/<name>/session.json
//! sessions/<name>/notes.md        (only when the session has notes)
//! ```
//!
//! `notes.md` is a readable copy for people opening the archive by hand;
//! import takes notes from `session.json`.
//!
//! The manifest lists every session the archive carries. Import reads and
//! validates it against the session entries before the local store is
//! touched.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::{Session, validate_name};
use crate::report::Reporter;
use crate::storage::SessionStore;
use crate::sync::{BranchSync, SessionSyncReport};
use crate::{Error, Result};

/// Bundle layout version written by this build.
pub const FORMAT_VERSION: u32 = 1;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const SESSIONS_DIR: &str = "sessions";
pub const SESSION_FILE: &str = "session.json";
pub const NOTES_FILE: &str = "notes.md";

/// One line of the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_key: Option<String>,
    /// Some repositories failed to synchronize before export
    #[serde(default)]
    pub partial: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub format_version: u32,
    pub created: DateTime<Utc>,
    pub exported_by: String,
    pub session_count: usize,
    pub sessions: Vec<ManifestEntry>,
}

/// A validated bundle read from disk.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub manifest: BundleManifest,
    /// In manifest order
    pub sessions: Vec<Session>,
}

/// Tool identification recorded as `exported_by`.
pub fn exported_by() -> String {
    format!("wt {} ({})", env!("CARGO_PKG_VERSION"), env!("WT_GIT_COMMIT"))
}

/// Render a session's notes as markdown.
pub fn render_notes(session: &Session) -> Option<String> {
    if session.notes.is_empty() {
        return None;
    }
    let mut out = format!("# Notes: {}\n", session.name);
    for note in &session.notes {
        out.push_str(&format!(
            "\n## {}\n\n{}\n",
            note.created.format("%Y-%m-%d %H:%M UTC"),
            note.text.trim_end()
        ));
    }
    Some(out)
}

/// Write `sessions` into a new bundle at `path`.
///
/// `partial` names the sessions whose synchronization did not complete.
pub fn write_bundle(
    path: &Path,
    sessions: &[Session],
    partial: &BTreeSet<String>,
    now: DateTime<Utc>,
) -> Result<BundleManifest> {
    let manifest = BundleManifest {
        format_version: FORMAT_VERSION,
        created: now,
        exported_by: exported_by(),
        session_count: sessions.len(),
        sessions: sessions
            .iter()
            .map(|s| ManifestEntry {
                name: s.name.clone(),
                issue_key: s.issue_key.clone(),
                partial: partial.contains(&s.name),
            })
            .collect(),
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file = File::create(path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let mtime = now.timestamp().max(0) as u64;

    append(&mut builder, MANIFEST_FILE, &serde_json::to_vec_pretty(&manifest)?, mtime)?;
    for session in sessions {
        let dir = format!("{}/{}", SESSIONS_DIR, session.name);
        append(
            &mut builder,
            &format!("{}/{}", dir, SESSION_FILE),
            &serde_json::to_vec_pretty(session)?,
            mtime,
        )?;
        if let Some(notes) = render_notes(session) {
            append(&mut builder, &format!("{}/{}", dir, NOTES_FILE), notes.as_bytes(), mtime)?;
        }
    }

    let encoder = builder.into_inner()?;
    let mut file = encoder.finish()?;
    file.flush()?;

    debug!(path = %path.display(), sessions = manifest.session_count, "wrote bundle");
    Ok(manifest)
}

fn append<W: Write>(
    builder: &mut tar::Builder<W>,
    name: &str,
    data: &[u8],
    mtime: u64,
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(mtime);
    builder.append_data(&mut header, name, data)?;
    Ok(())
}

/// Read and validate a bundle.
pub fn read_bundle(path: &Path) -> Result<Bundle> {
    let file = File::open(path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));

    let mut manifest: Option<BundleManifest> = None;
    let mut sessions: BTreeMap<String, Session> = BTreeMap::new();

    let entries = archive
        .entries()
        .map_err(|e| Error::InvalidBundle(format!("{}: {}", path.display(), e)))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| Error::InvalidBundle(format!("{}: {}", path.display(), e)))?;
        let entry_path = entry.path()?.into_owned();
        let parts = normal_components(&entry_path)?;
        let mut content = String::new();

        match parts.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
            [MANIFEST_FILE] => {
                entry.read_to_string(&mut content)?;
                manifest = Some(serde_json::from_str(&content).map_err(|e| {
                    Error::InvalidBundle(format!("{} is not valid: {}", MANIFEST_FILE, e))
                })?);
            }
            [SESSIONS_DIR, name, SESSION_FILE] => {
                entry.read_to_string(&mut content)?;
                let session: Session = serde_json::from_str(&content).map_err(|e| {
                    Error::InvalidBundle(format!("session '{}' is not valid: {}", name, e))
                })?;
                if session.name != *name {
                    return Err(Error::InvalidBundle(format!(
                        "session stored under '{}' is named '{}'",
                        name, session.name
                    )));
                }
                if sessions.insert(name.to_string(), session).is_some() {
                    return Err(Error::InvalidBundle(format!("session '{}' appears twice", name)));
                }
            }
            _ => debug!(path = %entry_path.display(), "ignoring bundle entry"),
        }
    }

    let manifest =
        manifest.ok_or_else(|| Error::InvalidBundle(format!("missing {}", MANIFEST_FILE)))?;
    validate_manifest(&manifest, &sessions)?;

    let sessions = manifest
        .sessions
        .iter()
        .filter_map(|entry| sessions.remove(&entry.name))
        .collect();

    Ok(Bundle { manifest, sessions })
}

/// Split an archive path, rejecting absolute paths and `..`.
fn normal_components(path: &Path) -> Result<Vec<String>> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => {
                return Err(Error::InvalidBundle(format!(
                    "unsafe entry path '{}'",
                    path.display()
                )));
            }
        }
    }
    Ok(parts)
}

fn validate_manifest(manifest: &BundleManifest, sessions: &BTreeMap<String, Session>) -> Result<()> {
    if manifest.format_version == 0 || manifest.format_version > FORMAT_VERSION {
        return Err(Error::InvalidBundle(format!(
            "unsupported format version {} (this build reads up to {})",
            manifest.format_version, FORMAT_VERSION
        )));
    }
    if manifest.session_count != manifest.sessions.len() || manifest.session_count != sessions.len()
    {
        return Err(Error::InvalidBundle(format!(
            "manifest declares {} sessions, lists {}, archive contains {}",
            manifest.session_count,
            manifest.sessions.len(),
            sessions.len()
        )));
    }

    let listed: BTreeSet<&str> = manifest.sessions.iter().map(|e| e.name.as_str()).collect();
    if listed.len() != manifest.sessions.len() {
        return Err(Error::InvalidBundle("manifest lists a session twice".to_string()));
    }
    for name in &listed {
        validate_name(name).map_err(|e| Error::InvalidBundle(e.to_string()))?;
        if !sessions.contains_key(*name) {
            return Err(Error::InvalidBundle(format!(
                "manifest lists '{}' but the archive does not contain it",
                name
            )));
        }
    }
    Ok(())
}

/// Export options.
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Write the bundle even if some repositories failed to synchronize
    pub allow_partial: bool,
    /// Co-author trailer for WIP commits
    pub attribution: String,
}

/// Result of [`export_sessions`].
#[derive(Debug)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub manifest: BundleManifest,
    pub sync: Vec<SessionSyncReport>,
}

/// Synchronize and bundle the named sessions.
///
/// Sessions are synchronized one after another. Captured remote URLs are
/// saved to the store even when the export is then refused. Unless
/// `allow_partial` is set, any repository failure aborts the export with
/// [`Error::PartialExport`] and no bundle is written.
pub fn export_sessions(
    store: &mut SessionStore,
    names: &[String],
    sync: &BranchSync<'_>,
    reporter: &dyn Reporter,
    options: &ExportOptions,
    output: &Path,
    now: DateTime<Utc>,
) -> Result<ExportSummary> {
    if names.is_empty() {
        return Err(Error::InvalidInput("No sessions to export".to_string()));
    }

    let mut sessions = Vec::with_capacity(names.len());
    for name in names {
        let session = store.get(name)?;
        session.require_conversations()?;
        sessions.push(session.clone());
    }

    let mut reports = Vec::with_capacity(sessions.len());
    let mut partial = BTreeSet::new();
    let mut failures = Vec::new();
    for session in sessions.iter_mut() {
        reporter.info(&format!("Synchronizing session '{}'", session.name));
        let report = sync.sync_session(session, &options.attribution)?;
        for (repository, err) in report.failures() {
            failures.push(format!("{}/{}: {}", session.name, repository, err));
        }
        if !report.is_complete() {
            partial.insert(session.name.clone());
        }
        store.update(session.clone(), now)?;
        reports.push(report);
    }
    store.save()?;

    if !failures.is_empty() && !options.allow_partial {
        return Err(Error::PartialExport(failures));
    }
    for failure in &failures {
        reporter.warn(failure);
    }

    let manifest = write_bundle(output, &sessions, &partial, now)?;
    info!(path = %output.display(), sessions = manifest.session_count, partial = partial.len(), "exported");
    Ok(ExportSummary {
        path: output.to_path_buf(),
        manifest,
        sync: reports,
    })
}

/// Default bundle file name for an export.
pub fn default_bundle_name(names: &[String], now: DateTime<Utc>) -> PathBuf {
    let stamp = now.format("%Y%m%d-%H%M%S");
    match names {
        [single] => PathBuf::from(format!("{}-{}.tar.gz", single, stamp)),
        _ => PathBuf::from(format!("worktrail-export-{}.tar.gz", stamp)),
    }
}

/// What to do with an incoming session whose name exists locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ImportPolicy {
    /// Keep local sessions; skip conflicting incoming ones
    #[default]
    Merge,
    /// Overwrite local sessions with incoming ones
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportAction {
    Add,
    Skip,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedImport {
    pub name: String,
    pub conflict: bool,
    pub action: ImportAction,
}

/// The effect an import would have, computed without writing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportPlan {
    pub policy: ImportPolicy,
    pub sessions: Vec<PlannedImport>,
}

impl ImportPlan {
    pub fn conflicts(&self) -> impl Iterator<Item = &str> {
        self.sessions
            .iter()
            .filter(|p| p.conflict)
            .map(|p| p.name.as_str())
    }

    pub fn count(&self, action: ImportAction) -> usize {
        self.sessions.iter().filter(|p| p.action == action).count()
    }
}

/// Classify every bundled session against the local store.
pub fn plan_import(bundle: &Bundle, store: &SessionStore, policy: ImportPolicy) -> ImportPlan {
    let sessions = bundle
        .sessions
        .iter()
        .map(|session| {
            let conflict = store.contains(&session.name);
            let action = match (conflict, policy) {
                (false, _) => ImportAction::Add,
                (true, ImportPolicy::Merge) => ImportAction::Skip,
                (true, ImportPolicy::Replace) => ImportAction::Replace,
            };
            PlannedImport {
                name: session.name.clone(),
                conflict,
                action,
            }
        })
        .collect();
    ImportPlan { policy, sessions }
}

/// Apply a plan produced by [`plan_import`] for the same bundle.
///
/// Incoming sessions are stored exactly as exported. The caller saves.
pub fn apply_import(plan: &ImportPlan, bundle: Bundle, store: &mut SessionStore) -> Result<()> {
    let mut incoming: BTreeMap<String, Session> = bundle
        .sessions
        .into_iter()
        .map(|session| (session.name.clone(), session))
        .collect();

    for planned in &plan.sessions {
        if planned.action == ImportAction::Skip {
            continue;
        }
        let session = incoming.remove(&planned.name).ok_or_else(|| {
            Error::InvalidBundle(format!("planned session '{}' is not in the bundle", planned.name))
        })?;
        debug!(session = %planned.name, action = ?planned.action, "importing");
        store.put(session);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::GitCli;
    use crate::models::{ConversationContext, Note};
    use crate::report::NullReporter;
    use crate::storage::NewSession;
    use crate::test_utils::GitFixture;
    use tempfile::TempDir;

    fn session(name: &str, goal: &str) -> Session {
        let now = Utc::now();
        let mut session = Session::new(name, now);
        session.goal = Some(goal.to_string());
        session.add_conversation(
            "api",
            ConversationContext::new("agent-1", "/src/api", Some("feature/x".to_string()), now),
            now,
        );
        session.start_tracking("alice", now);
        session
    }

    fn store_in(dir: &Path) -> SessionStore {
        SessionStore::open_locked(dir, &NullReporter).unwrap()
    }

    #[test]
    fn test_round_trip_into_empty_store() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out.tar.gz");
        let mut original = session("login", "PROJ-1: Fix login");
        original.issue_key = Some("PROJ-1".to_string());
        original.add_conversation(
            "web",
            ConversationContext::new("agent-2", "/src/web", None, Utc::now()),
            Utc::now(),
        );
        original.notes.push(Note {
            created: Utc::now(),
            text: "Blocked on review".to_string(),
        });

        let manifest = write_bundle(&path, &[original.clone()], &BTreeSet::new(), Utc::now()).unwrap();
        assert_eq!(manifest.session_count, 1);

        let bundle = read_bundle(&path).unwrap();
        assert_eq!(bundle.manifest, manifest);
        assert_eq!(bundle.sessions[0].notes.len(), 1);

        let mut store = store_in(&temp.path().join("data"));
        let plan = plan_import(&bundle, &store, ImportPolicy::Merge);
        apply_import(&plan, bundle, &mut store).unwrap();

        let imported = store.get("login").unwrap();
        assert_eq!(imported, &original);
        assert_eq!(imported.issue_key.as_deref(), Some("PROJ-1"));
        assert_eq!(imported.conversations.len(), 2);
    }

    fn conflict_fixture() -> (TempDir, Bundle, SessionStore) {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("xy.tar.gz");
        write_bundle(
            &path,
            &[session("X", "incoming"), session("Y", "incoming")],
            &BTreeSet::new(),
            Utc::now(),
        )
        .unwrap();

        let mut store = store_in(&temp.path().join("data"));
        store.put(session("X", "local"));
        let bundle = read_bundle(&path).unwrap();
        (temp, bundle, store)
    }

    #[test]
    fn test_merge_keeps_local_and_adds_new() {
        let (_temp, bundle, mut store) = conflict_fixture();
        let plan = plan_import(&bundle, &store, ImportPolicy::Merge);
        assert_eq!(plan.conflicts().collect::<Vec<_>>(), vec!["X"]);
        assert_eq!(plan.count(ImportAction::Skip), 1);

        apply_import(&plan, bundle, &mut store).unwrap();
        assert_eq!(store.get("X").unwrap().goal.as_deref(), Some("local"));
        assert_eq!(store.get("Y").unwrap().goal.as_deref(), Some("incoming"));
    }

    #[test]
    fn test_replace_overwrites_local() {
        let (_temp, bundle, mut store) = conflict_fixture();
        let plan = plan_import(&bundle, &store, ImportPolicy::Replace);
        assert_eq!(plan.count(ImportAction::Replace), 1);
        assert_eq!(plan.count(ImportAction::Add), 1);

        apply_import(&plan, bundle, &mut store).unwrap();
        assert_eq!(store.get("X").unwrap().goal.as_deref(), Some("incoming"));
        assert_eq!(store.get("Y").unwrap().goal.as_deref(), Some("incoming"));
    }

    #[test]
    fn test_import_is_deterministic() {
        let (_temp, bundle, store) = conflict_fixture();
        let first = plan_import(&bundle, &store, ImportPolicy::Replace);
        let second = plan_import(&bundle, &store, ImportPolicy::Replace);
        assert_eq!(first, second);
    }

    #[test]
    fn test_manifest_count_mismatch_is_invalid() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.tar.gz");
        let file = File::create(&path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        let manifest = BundleManifest {
            format_version: FORMAT_VERSION,
            created: Utc::now(),
            exported_by: "test".to_string(),
            session_count: 2,
            sessions: vec![ManifestEntry {
                name: "X".to_string(),
                issue_key: None,
                partial: false,
            }],
        };
        append(&mut builder, MANIFEST_FILE, &serde_json::to_vec(&manifest).unwrap(), 0).unwrap();
        append(
            &mut builder,
            "sessions/X/session.json",
            &serde_json::to_vec(&session("X", "g")).unwrap(),
            0,
        )
        .unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let err = read_bundle(&path).unwrap_err();
        assert!(matches!(err, Error::InvalidBundle(msg) if msg.contains("declares 2")));
    }

    #[test]
    fn test_missing_manifest_is_invalid() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("empty.tar.gz");
        let file = File::create(&path).unwrap();
        let builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        builder.into_inner().unwrap().finish().unwrap();

        assert!(matches!(read_bundle(&path), Err(Error::InvalidBundle(_))));
    }

    #[test]
    fn test_not_a_bundle() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("plain.txt");
        std::fs::write(&path, "hello").unwrap();
        assert!(read_bundle(&path).is_err());
    }

    #[test]
    fn test_default_bundle_name() {
        let now = chrono::TimeZone::with_ymd_and_hms(&Utc, 2026, 3, 1, 9, 30, 0).unwrap();
        assert_eq!(
            default_bundle_name(&["login".to_string()], now),
            PathBuf::from("login-20260301-093000.tar.gz")
        );
        assert_eq!(
            default_bundle_name(&[], now),
            PathBuf::from("worktrail-export-20260301-093000.tar.gz")
        );
    }

    fn new_session(name: &str, path: &Path, branch: &str) -> NewSession {
        NewSession {
            name: name.to_string(),
            goal: None,
            repository: "work".to_string(),
            project_path: path.to_path_buf(),
            agent_session_id: "agent".to_string(),
            branch: Some(branch.to_string()),
            issue_key: Some("PROJ-5".to_string()),
            workspace_name: None,
            user: "alice".to_string(),
        }
    }

    #[test]
    fn test_export_syncs_and_writes_bundle() {
        let fixture = GitFixture::new();
        fixture.write("wip.txt", "draft\n");
        let temp = TempDir::new().unwrap();
        let mut store = store_in(temp.path());
        store
            .create(new_session("login", &fixture.work, "feature/x"), Utc::now())
            .unwrap();

        let cli = GitCli::default();
        let sync = BranchSync::new(&cli, &NullReporter);
        let output = temp.path().join("login.tar.gz");
        let summary = export_sessions(
            &mut store,
            &["login".to_string()],
            &sync,
            &NullReporter,
            &ExportOptions::default(),
            &output,
            Utc::now(),
        )
        .unwrap();

        assert!(output.exists());
        assert!(!summary.manifest.sessions[0].partial);
        assert!(fixture.remote_has_branch("feature/x"));
        let context = store.get("login").unwrap().conversations.get("work").unwrap().active().unwrap();
        assert!(context.remote_url.is_some());
    }

    #[test]
    fn test_export_refuses_partial_by_default() {
        let fixture = GitFixture::new();
        // Point origin somewhere unreachable so the push fails.
        crate::test_utils::git(
            &fixture.work,
            &["remote", "set-url", "origin", "/nonexistent/origin.git"],
        );
        let temp = TempDir::new().unwrap();
        let mut store = store_in(temp.path());
        store
            .create(new_session("login", &fixture.work, "feature/x"), Utc::now())
            .unwrap();

        let cli = GitCli::default();
        let sync = BranchSync::new(&cli, &NullReporter);
        let output = temp.path().join("login.tar.gz");
        let names = vec!["login".to_string()];

        let err = export_sessions(
            &mut store,
            &names,
            &sync,
            &NullReporter,
            &ExportOptions::default(),
            &output,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(&err, Error::PartialExport(failures) if failures[0].contains("Teammate needs branch on remote")));
        assert!(!output.exists());

        let options = ExportOptions {
            allow_partial: true,
            ..Default::default()
        };
        let summary = export_sessions(&mut store, &names, &sync, &NullReporter, &options, &output, Utc::now())
            .unwrap();
        assert!(summary.manifest.sessions[0].partial);
        assert!(read_bundle(&output).unwrap().manifest.sessions[0].partial);
    }

    #[test]
    fn test_export_rejects_session_without_conversations() {
        let temp = TempDir::new().unwrap();
        let mut store = store_in(temp.path());
        store.put(Session::new("bare", Utc::now()));

        let cli = GitCli::default();
        let sync = BranchSync::new(&cli, &NullReporter);
        let err = export_sessions(
            &mut store,
            &["bare".to_string()],
            &sync,
            &NullReporter,
            &ExportOptions::default(),
            &temp.path().join("b.tar.gz"),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::NoConversations(_)));
    }
}
