//! Argument vector for the `syncGitToIspw` CLI operation.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::queue::PushEvent;
use crate::resolve::{ConnectionDescriptor, Credentials};

/// Placeholder printed in place of a masked argument.
pub const MASK: &str = "******";

const OPERATION: &str = "syncGitToIspw";

/// Characters that make a value unsafe to pass through the CLI wrapper
/// script unquoted.
const SHELL_SPECIAL: &[char] = &[
    ' ', '\t', '\n', '"', '\'', '\\', '$', '`', '&', '|', ';', '<', '>', '(', ')', '*', '?', '[',
    ']', '{', '}', '!', '#', '~', '^', '%', '=',
];

#[derive(Debug, Clone, PartialEq, Eq)]
struct Arg {
    value: String,
    masked: bool,
}

/// Ordered program + arguments. Masked entries render as [`MASK`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentList {
    args: Vec<Arg>,
}

impl ArgumentList {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            args: vec![Arg {
                value: program.into(),
                masked: false,
            }],
        }
    }

    pub fn add(&mut self, value: impl Into<String>) -> &mut Self {
        self.args.push(Arg {
            value: value.into(),
            masked: false,
        });
        self
    }

    pub fn add_pair(&mut self, flag: &str, value: impl Into<String>) -> &mut Self {
        self.add(flag).add(value)
    }

    pub fn add_masked(&mut self, flag: &str, value: impl Into<String>) -> &mut Self {
        self.add(flag);
        self.args.push(Arg {
            value: value.into(),
            masked: true,
        });
        self
    }

    pub fn program(&self) -> &str {
        &self.args[0].value
    }

    /// Arguments after the program, unmasked.
    pub fn arguments(&self) -> Vec<String> {
        self.args[1..].iter().map(|a| a.value.clone()).collect()
    }

    /// Program and arguments, unmasked.
    pub fn to_vec(&self) -> Vec<String> {
        self.args.iter().map(|a| a.value.clone()).collect()
    }

    /// Value following `flag`, if present.
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .windows(2)
            .find(|pair| pair[0].value == flag && !pair[0].masked)
            .map(|pair| pair[1].value.as_str())
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| !a.masked && a.value == flag)
    }

    /// Log-safe rendering.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ArgumentList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(if arg.masked { MASK } else { &arg.value })?;
        }
        Ok(())
    }
}

/// Wrap `value` in double quotes when it contains whitespace or a shell
/// metacharacter, escaping `"`, `\`, `$` and backtick inside.
pub fn escape_for_script(value: &str) -> String {
    if !value.contains(SHELL_SPECIAL) {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// The CLI only splits `-gitHash` correctly when a single hash arrives
/// quoted; a space-separated list is passed as is.
pub fn quote_to_hash(to_hash: &str) -> String {
    if to_hash.contains(char::is_whitespace) {
        to_hash.to_string()
    } else {
        format!("\"{}\"", to_hash)
    }
}

/// Paths handed to the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPaths {
    pub target_folder: PathBuf,
    pub data_dir: PathBuf,
    pub git_local_path: PathBuf,
}

/// Everything besides the batch that goes into one invocation.
#[derive(Debug, Clone)]
pub struct SyncParameters {
    pub connection: ConnectionDescriptor,
    pub ispw_credentials: Credentials,
    pub git_credentials: Option<Credentials>,
    pub runtime_config: String,
    pub repo_url: String,
    pub paths: TargetPaths,
}

/// The queue contents summarized into one CLI call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub git_ref: String,
    pub from_hash: String,
    pub to_hash: String,
    pub stream: String,
    pub app: String,
    pub level: String,
    pub container_pref: Option<String>,
    pub container_desc: Option<String>,
    pub events: usize,
    /// Target fields on which an older event disagrees with the newest.
    pub overridden: Vec<&'static str>,
}

impl Batch {
    /// Ref and ISPW target come from the newest event, `from_hash` from the
    /// oldest, and `to_hash` lists every distinct target hash in queue
    /// order. `None` for an empty queue.
    pub fn from_queue(events: &[PushEvent]) -> Option<Batch> {
        let oldest = events.first()?;
        let newest = events.last()?;

        let to_hash = if events.len() == 1 {
            oldest.to_hash.clone()
        } else {
            let mut hashes: Vec<&str> = Vec::new();
            for hash in events.iter().flat_map(PushEvent::to_hashes) {
                if !hashes.contains(&hash) {
                    hashes.push(hash);
                }
            }
            hashes.join(" ")
        };

        let overridden = TARGET_FIELDS
            .iter()
            .copied()
            .filter(|&name| {
                events
                    .iter()
                    .any(|e| target_field(e, name) != target_field(newest, name))
            })
            .collect();

        Some(Batch {
            git_ref: newest.git_ref.clone(),
            from_hash: oldest.from_hash.clone(),
            to_hash,
            stream: newest.stream.clone(),
            app: newest.app.clone(),
            level: newest.level.clone(),
            container_pref: newest.container_pref.clone(),
            container_desc: newest.container_desc.clone(),
            events: events.len(),
            overridden,
        })
    }

    pub fn to_hashes(&self) -> Vec<&str> {
        self.to_hash.split_whitespace().collect()
    }
}

const TARGET_FIELDS: &[&str] = &["ref", "stream", "app", "level"];

fn target_field<'e>(event: &'e PushEvent, name: &str) -> &'e str {
    match name {
        "ref" => &event.git_ref,
        "stream" => &event.stream,
        "app" => &event.app,
        _ => &event.level,
    }
}

fn path_arg(path: &Path) -> String {
    escape_for_script(&path.to_string_lossy())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Assemble the full argument vector. Pure: the same inputs always give
/// the same list.
pub fn build_arguments(script: &Path, params: &SyncParameters, batch: &Batch) -> ArgumentList {
    let conn = &params.connection;
    let ispw = &params.ispw_credentials;

    let mut args = ArgumentList::new(script.to_string_lossy());
    args.add_pair("-operation", OPERATION)
        .add_pair("-host", escape_for_script(&conn.host))
        .add_pair("-port", conn.port.to_string())
        .add_pair("-id", escape_for_script(&ispw.username))
        .add_masked("-pass", escape_for_script(&ispw.secret));

    if let Some(protocol) = non_blank(conn.protocol.as_deref()) {
        args.add_pair("-protocol", escape_for_script(protocol));
    }

    args.add_pair("-code", escape_for_script(&conn.code_page))
        .add_pair("-timeout", conn.timeout_secs.to_string())
        .add_pair("-targetFolder", path_arg(&params.paths.target_folder))
        .add_pair("-data", path_arg(&params.paths.data_dir));

    if let Some(runtime) = non_blank(Some(&params.runtime_config)) {
        args.add_pair("-ispwServerConfig", escape_for_script(runtime));
    }

    args.add_pair("-ispwServerStream", escape_for_script(&batch.stream))
        .add_pair("-ispwServerApp", escape_for_script(&batch.app))
        .add_pair("-ispwCheckoutLevel", escape_for_script(&batch.level));

    if let Some(pref) = non_blank(batch.container_pref.as_deref()) {
        args.add_pair("-ispwContainerCreation", escape_for_script(pref));
    }
    if let Some(desc) = non_blank(batch.container_desc.as_deref()) {
        args.add_pair("-ispwContainerDescription", escape_for_script(desc));
    }

    let (git_user, git_secret) = params
        .git_credentials
        .as_ref()
        .map(|c| (escape_for_script(&c.username), escape_for_script(&c.secret)))
        .unwrap_or_default();

    args.add_pair("-gitUsername", git_user)
        .add_masked("-gitPassword", git_secret)
        .add_pair("-gitRepoUrl", escape_for_script(&params.repo_url))
        .add_pair("-gitRef", escape_for_script(&batch.git_ref))
        .add_pair("-gitFromHash", escape_for_script(&batch.from_hash))
        .add_pair("-gitHash", quote_to_hash(&batch.to_hash))
        .add_pair("-gitLocalPath", path_arg(&params.paths.git_local_path));

    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::event::sample_event;

    fn params() -> SyncParameters {
        SyncParameters {
            connection: ConnectionDescriptor {
                host: "cw09.example.com".into(),
                port: 47623,
                protocol: None,
                code_page: "1047".into(),
                timeout_secs: 0,
            },
            ispw_credentials: Credentials::new("XDEVREG", "pa$$word"),
            git_credentials: Some(Credentials::new("builder", "gitsecret")),
            runtime_config: String::new(),
            repo_url: "https://bitbucket.example.com/scm/play/play.git".into(),
            paths: TargetPaths {
                target_folder: PathBuf::from("/ws"),
                data_dir: PathBuf::from("/ws/TopazCliWkspc"),
                git_local_path: PathBuf::from("/ws"),
            },
        }
    }

    fn single_batch() -> Batch {
        Batch::from_queue(&[sample_event("refs/heads/main", "abc123", "def456")]).unwrap()
    }

    #[test]
    fn test_escape_plain_value_unchanged() {
        assert_eq!(escape_for_script("cw09.example.com"), "cw09.example.com");
        assert_eq!(escape_for_script(""), "");
    }

    #[test]
    fn test_escape_quotes_and_escapes_specials() {
        assert_eq!(escape_for_script("my repo"), "\"my repo\"");
        assert_eq!(escape_for_script("pa$$"), "\"pa\\$\\$\"");
        assert_eq!(escape_for_script("a\"b"), "\"a\\\"b\"");
        assert_eq!(escape_for_script("x`y`"), "\"x\\`y\\`\"");
        assert_eq!(escape_for_script("C:\\tmp dir"), "\"C:\\\\tmp dir\"");
    }

    #[test]
    fn test_to_hash_without_whitespace_is_quoted() {
        assert_eq!(quote_to_hash("def456"), "\"def456\"");
    }

    #[test]
    fn test_to_hash_with_whitespace_is_unchanged() {
        assert_eq!(quote_to_hash("aaa bbb"), "aaa bbb");
    }

    #[test]
    fn test_flag_order() {
        let args = build_arguments(Path::new("/opt/cli/IspwCLI.sh"), &params(), &single_batch());
        let flags: Vec<String> = args
            .to_vec()
            .into_iter()
            .filter(|a| a.starts_with('-'))
            .collect();
        assert_eq!(
            flags,
            vec![
                "-operation",
                "-host",
                "-port",
                "-id",
                "-pass",
                "-code",
                "-timeout",
                "-targetFolder",
                "-data",
                "-ispwServerStream",
                "-ispwServerApp",
                "-ispwCheckoutLevel",
                "-ispwContainerCreation",
                "-gitUsername",
                "-gitPassword",
                "-gitRepoUrl",
                "-gitRef",
                "-gitFromHash",
                "-gitHash",
                "-gitLocalPath",
            ]
        );
        assert_eq!(args.program(), "/opt/cli/IspwCLI.sh");
        assert_eq!(args.value_of("-operation"), Some("syncGitToIspw"));
        assert_eq!(args.value_of("-gitHash"), Some("\"def456\""));
        assert_eq!(args.value_of("-gitRef"), Some("refs/heads/main"));
        assert_eq!(args.value_of("-pass"), Some("\"pa\\$\\$word\""));
    }

    #[test]
    fn test_blank_optionals_omitted_and_present_ones_added() {
        let args = build_arguments(Path::new("IspwCLI.sh"), &params(), &single_batch());
        assert!(!args.has_flag("-protocol"));
        assert!(!args.has_flag("-ispwServerConfig"));
        assert!(!args.has_flag("-ispwContainerDescription"));

        let mut params = params();
        params.connection.protocol = Some("TLSv1.2".into());
        params.runtime_config = "ispw".into();
        let mut batch = single_batch();
        batch.container_desc = Some("Fix for ABC".into());
        let args = build_arguments(Path::new("IspwCLI.sh"), &params, &batch);
        assert_eq!(args.value_of("-protocol"), Some("TLSv1.2"));
        assert_eq!(args.value_of("-ispwServerConfig"), Some("ispw"));
        assert_eq!(
            args.value_of("-ispwContainerDescription"),
            Some("\"Fix for ABC\"")
        );
    }

    #[test]
    fn test_rendering_masks_both_passwords() {
        let args = build_arguments(Path::new("IspwCLI.sh"), &params(), &single_batch());
        let rendered = args.render();
        assert!(rendered.contains("-pass ****** "));
        assert!(rendered.contains("-gitPassword ****** "));
        assert!(!rendered.contains("pa\\$\\$word"));
        assert!(!rendered.contains("gitsecret"));
        assert!(args.to_vec().iter().any(|a| a == "gitsecret"));
    }

    #[test]
    fn test_missing_git_credentials_pass_empty_values() {
        let mut params = params();
        params.git_credentials = None;
        let args = build_arguments(Path::new("IspwCLI.sh"), &params, &single_batch());
        assert_eq!(args.value_of("-gitUsername"), Some(""));
        assert!(args.has_flag("-gitPassword"));
    }

    #[test]
    fn test_same_queue_gives_same_arguments() {
        let queue = vec![
            sample_event("refs/heads/main", "abc123", "def456"),
            sample_event("refs/heads/main", "def456", "0a1b2c"),
        ];
        let first = build_arguments(
            Path::new("IspwCLI.sh"),
            &params(),
            &Batch::from_queue(&queue).unwrap(),
        );
        let second = build_arguments(
            Path::new("IspwCLI.sh"),
            &params(),
            &Batch::from_queue(&queue).unwrap(),
        );
        assert_eq!(first.to_vec(), second.to_vec());
    }

    #[test]
    fn test_batch_summarizes_backlog() {
        let mut newest = sample_event("refs/heads/dev1", "def456", "0a1b2c");
        newest.level = "DEV2".into();
        let queue = vec![
            sample_event("refs/heads/main", "abc123", "def456"),
            sample_event("refs/heads/main", "abc123", "def456"),
            newest,
        ];
        let batch = Batch::from_queue(&queue).unwrap();
        assert_eq!(batch.git_ref, "refs/heads/dev1");
        assert_eq!(batch.from_hash, "abc123");
        assert_eq!(batch.to_hash, "def456 0a1b2c");
        assert_eq!(batch.level, "DEV2");
        assert_eq!(batch.events, 3);
        assert_eq!(batch.overridden, vec!["ref", "level"]);
        assert_eq!(quote_to_hash(&batch.to_hash), "def456 0a1b2c");
    }

    #[test]
    fn test_batch_across_branches_uses_newest_target() {
        let mut older = sample_event("refs/heads/dev1", "aaa", "bbb");
        older.level = "DEV1".into();
        let mut newest = sample_event("refs/heads/main", "ccc", "ddd");
        newest.level = "MAIN".into();
        let batch = Batch::from_queue(&[older, newest]).unwrap();
        assert_eq!(batch.git_ref, "refs/heads/main");
        assert_eq!(batch.level, "MAIN");
        assert_eq!(batch.from_hash, "aaa");
        assert_eq!(batch.to_hash, "bbb ddd");
        assert_eq!(batch.overridden, vec!["ref", "level"]);
    }

    #[test]
    fn test_batch_on_one_branch_overrides_nothing() {
        let queue = vec![
            sample_event("refs/heads/main", "abc123", "def456"),
            sample_event("refs/heads/main", "def456", "0a1b2c"),
        ];
        assert!(Batch::from_queue(&queue).unwrap().overridden.is_empty());
        assert!(single_batch().overridden.is_empty());
    }

    #[test]
    fn test_single_event_to_hash_passes_verbatim() {
        let batch =
            Batch::from_queue(&[sample_event("refs/heads/main", "abc", "h1  h2")]).unwrap();
        assert_eq!(batch.to_hash, "h1  h2");
        assert_eq!(batch.to_hashes(), vec!["h1", "h2"]);
    }

    #[test]
    fn test_empty_queue_has_no_batch() {
        assert!(Batch::from_queue(&[]).is_none());
    }
}
