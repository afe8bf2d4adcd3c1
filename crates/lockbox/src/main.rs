//! lockbox - local secrets vault
//!
//! One passphrase-encrypted file holding a nested tree of secrets.
//!
//! Commands:
//! - get [PATH]: Print a value, or the whole tree
//! - set <PATH> [VALUE]: Store a value (prompts if no value)
//! - update: Apply a batch of set/delete/merge operations in one write
//! - delete <PATH>: Delete a value, pruning emptied branches
//! - inspect [PATH]: Show structure with values masked
//! - edit: Edit the whole tree in $EDITOR
//! - exec <CMD>: Run a command with secrets in its environment
//! - env: Output secrets as shell exports
//! - passwd: Re-encrypt under a new passphrase
//! - path: Show which file is in use

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lockbox::accessor::{self, Mutation};
use lockbox::codec;
use lockbox::editor;
use lockbox::inject::{self, EnvBinding};
use lockbox::{
    KeyPath, Passphrase, PasswordPrompt, Paths, SecretsFile, SecretsTree, Session,
    TerminalPrompt, UnlockGuard, VaultConfig, VaultError,
};
use serde_yaml::{Mapping, Value};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Interactive unlock attempts before giving up
const MAX_ATTEMPTS: usize = 3;

#[derive(Parser)]
#[command(name = "lockbox")]
#[command(about = "Local secrets vault - a passphrase-encrypted tree of secrets")]
#[command(version)]
#[command(after_help = r#"PATHS:
    Address values with slash-separated keys or a YAML list:
    - api/openai           string keys
    - [db, 5432]           typed keys (string, then integer)

FILE LOOKUP:
    --file PATH, else ./.lockbox if present, else ~/.lockbox

SECURITY:
    - PBKDF2-HMAC-SHA256 key derivation, AES-256-GCM encryption
    - Fresh salt and IV on every write; file replaced atomically
    - Passphrase never stored, values never logged"#)]
struct Cli {
    /// Secrets file to use instead of the default lookup
    #[arg(short, long, global = true)]
    file: Option<PathBuf>,

    /// Read the passphrase from this environment variable instead of prompting
    #[arg(long, global = true, value_name = "VAR")]
    passphrase_env: Option<String>,

    /// Debug logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the value at PATH (or the whole tree)
    Get {
        /// Don't print trailing newline (useful for piping)
        #[arg(short = 'n')]
        no_newline: bool,
        /// Key path (e.g., api/openai)
        path: Option<KeyPath>,
    },

    /// Store a value (prompts securely if VALUE is omitted)
    Set {
        /// Key path (e.g., api/openai, [db, 5432])
        path: KeyPath,
        /// Value, parsed as YAML unless --raw (omit for hidden prompt)
        value: Option<String>,
        /// Store VALUE as a literal string
        #[arg(long)]
        raw: bool,
    },

    /// Apply several operations in a single write
    Update {
        /// PATH=VALUE to store (repeatable)
        #[arg(long = "set", value_name = "PATH=VALUE", value_parser = parse_assignment)]
        sets: Vec<(KeyPath, Value)>,
        /// PATH to delete (repeatable)
        #[arg(long = "delete", value_name = "PATH")]
        deletes: Vec<KeyPath>,
        /// YAML map to deep-merge
        #[arg(long, value_name = "YAML")]
        merge: Option<String>,
        /// Where to merge (default: root)
        #[arg(long, value_name = "PATH", requires = "merge")]
        at: Option<KeyPath>,
    },

    /// Delete the value at PATH; empty parent maps are removed too
    Delete {
        /// Key path to delete
        path: KeyPath,
    },

    /// Show the tree (or a subtree) with every value masked
    Inspect {
        /// Subtree to show
        path: Option<KeyPath>,
    },

    /// Edit the whole tree as YAML in $VISUAL / $EDITOR
    Edit,

    /// Run a command with secrets injected as environment variables
    Exec {
        /// NAME=PATH binding (repeatable)
        #[arg(short = 'e', long = "env", value_name = "NAME=PATH")]
        bindings: Vec<EnvBinding>,
        /// Inject every value under this path
        #[arg(long)]
        prefix: Option<KeyPath>,
        /// Command to run
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Output secrets as shell export statements (eval $(lockbox env))
    Env {
        /// Only values under this path
        #[arg(long)]
        prefix: Option<KeyPath>,
    },

    /// Re-encrypt the file under a new passphrase
    Passwd,

    /// Show which secrets file is in use
    Path,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let paths = Paths::new()?;
    let config = VaultConfig::load(&paths)?;
    let file = SecretsFile::resolve(&paths, cli.file.as_deref(), &config);
    let session = Session::new(file, Box::new(TerminalPrompt));

    let supplied = cli
        .passphrase_env
        .as_deref()
        .map(passphrase_from_env)
        .transpose()?;
    let interactive = supplied.is_none();
    let _override = supplied.map(|passphrase| session.override_passphrase(passphrase));

    let ctx = Ctx {
        session: &session,
        config: &config,
        interactive,
    };

    match cli.command {
        Some(Commands::Get { no_newline, path }) => cmd_get(&ctx, path.as_ref(), no_newline),
        Some(Commands::Set { path, value, raw }) => cmd_set(&ctx, &path, value, raw),
        Some(Commands::Update {
            sets,
            deletes,
            merge,
            at,
        }) => cmd_update(&ctx, sets, deletes, merge, at),
        Some(Commands::Delete { path }) => cmd_delete(&ctx, &path),
        Some(Commands::Inspect { path }) => cmd_inspect(&ctx, path.as_ref()),
        Some(Commands::Edit) => cmd_edit(&ctx),
        Some(Commands::Exec {
            bindings,
            prefix,
            command,
        }) => cmd_exec(&ctx, &bindings, prefix.as_ref(), &command),
        Some(Commands::Env { prefix }) => cmd_env(&ctx, prefix.as_ref()),
        Some(Commands::Passwd) => cmd_passwd(&ctx),
        Some(Commands::Path) => cmd_path(&ctx),
        None => {
            // Default to a masked overview
            cmd_inspect(&ctx, None)
        }
    }
}

/// Everything a command needs
struct Ctx<'a> {
    session: &'a Session,
    config: &'a VaultConfig,
    interactive: bool,
}

impl<'a> Ctx<'a> {
    /// Unlock, re-prompting on a wrong passphrase when a human is typing it
    fn unlock(&self) -> Result<UnlockGuard<'a>> {
        let mut attempt = 1;
        loop {
            match self.session.unlock() {
                Err(err)
                    if self.interactive
                        && attempt < MAX_ATTEMPTS
                        && VaultError::is_authentication(&err) =>
                {
                    eprintln!("error: passphrase incorrect, try again");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "lockbox=debug" } else { "warn" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn passphrase_from_env(var: &str) -> Result<Passphrase> {
    let value = std::env::var(var)
        .with_context(|| format!("Passphrase variable {} is not set", var))?;
    Ok(Passphrase::new(value))
}

/// Parse PATH=VALUE for `update --set`
fn parse_assignment(s: &str) -> Result<(KeyPath, Value), VaultError> {
    let Some((path, value)) = s.split_once('=') else {
        return Err(VaultError::MalformedInput(format!(
            "expected PATH=VALUE, got '{}'",
            s
        )));
    };
    Ok((KeyPath::parse(path)?, codec::parse_value(value)?))
}

/// Print the value at a path, or the whole tree
fn cmd_get(ctx: &Ctx<'_>, path: Option<&KeyPath>, no_newline: bool) -> Result<()> {
    let _unlocked = ctx.unlock()?;

    let output = match path {
        Some(path) => match ctx.session.get(path)? {
            Some(value) => codec::render_value(&value),
            None => bail!(VaultError::NotFound(path.to_string())),
        },
        None => {
            let tree = ctx.session.tree()?;
            render_tree(&tree)?
        }
    };

    if no_newline {
        print!("{}", output);
    } else {
        println!("{}", output);
    }

    Ok(())
}

/// Store a value
fn cmd_set(ctx: &Ctx<'_>, path: &KeyPath, value: Option<String>, raw: bool) -> Result<()> {
    let value = match value {
        Some(v) if raw => Value::String(v),
        Some(v) => codec::parse_value(&v)
            .context("Value is not valid YAML; pass --raw to store it as text")?,
        None => {
            // Prompt for hidden input
            let secret = rpassword::prompt_password("Enter secret value: ")
                .context("Failed to read secret value")?;

            if secret.is_empty() {
                bail!("Empty value not allowed");
            }

            Value::String(secret)
        }
    };

    let _unlocked = ctx.unlock()?;
    let previous = ctx.session.set(path, value)?;

    match previous {
        Some(_) => println!("success: Secret updated: {}", path),
        None => println!("success: Secret stored: {}", path),
    }

    Ok(())
}

/// Apply a batch of mutations atomically
fn cmd_update(
    ctx: &Ctx<'_>,
    sets: Vec<(KeyPath, Value)>,
    deletes: Vec<KeyPath>,
    merge: Option<String>,
    at: Option<KeyPath>,
) -> Result<()> {
    let mut mutations: Vec<Mutation> = sets
        .into_iter()
        .map(|(path, value)| Mutation::Set { path, value })
        .collect();
    mutations.extend(deletes.into_iter().map(|path| Mutation::Delete { path }));

    if let Some(yaml) = merge {
        let value: Mapping = match codec::parse_value(&yaml)? {
            Value::Mapping(map) => map,
            _ => bail!(VaultError::MalformedInput(
                "--merge expects a YAML map".to_string()
            )),
        };
        mutations.push(Mutation::Merge { path: at, value });
    }

    if mutations.is_empty() {
        bail!("Nothing to do. Use --set, --delete or --merge");
    }

    let _unlocked = ctx.unlock()?;
    ctx.session
        .update(|tree| accessor::apply_all(tree, &mutations))?;

    println!("success: Applied {} operation(s)", mutations.len());
    Ok(())
}

/// Delete a value
fn cmd_delete(ctx: &Ctx<'_>, path: &KeyPath) -> Result<()> {
    let _unlocked = ctx.unlock()?;

    if ctx.session.get(path)?.is_none() {
        bail!(VaultError::NotFound(path.to_string()));
    }
    ctx.session.delete(path)?;

    println!("success: Secret deleted: {}", path);
    Ok(())
}

/// Show structure with values hidden
fn cmd_inspect(ctx: &Ctx<'_>, path: Option<&KeyPath>) -> Result<()> {
    let _unlocked = ctx.unlock()?;
    let tree = ctx.session.tree()?;

    let masked = match path {
        Some(path) => match accessor::get(&tree, path) {
            Some(value) => codec::render_value(&accessor::mask_value(value, &ctx.config.mask)),
            None => bail!(VaultError::NotFound(path.to_string())),
        },
        None if tree.is_empty() => {
            println!("No secrets stored. Add one with: lockbox set <path>");
            return Ok(());
        }
        None => render_tree(&accessor::mask(&tree, &ctx.config.mask))?,
    };

    println!("{}", masked);
    Ok(())
}

/// Edit in an external editor
fn cmd_edit(ctx: &Ctx<'_>) -> Result<()> {
    let _unlocked = ctx.unlock()?;
    let editor = editor::resolve_editor(ctx.config.editor.as_deref());

    if editor::edit_session(ctx.session, &editor)? {
        println!("success: Secrets saved");
    } else {
        println!("No changes");
    }
    Ok(())
}

/// Run a command with secrets injected
fn cmd_exec(
    ctx: &Ctx<'_>,
    bindings: &[EnvBinding],
    prefix: Option<&KeyPath>,
    command: &[String],
) -> Result<()> {
    let Some((program, args)) = command.split_first() else {
        bail!("Command required. Usage: lockbox exec -- <command>");
    };

    let vars = {
        let _unlocked = ctx.unlock()?;
        let tree = ctx.session.tree()?;
        collect_env(&tree, bindings, prefix)?
    };

    let mut cmd = inject::command_with_env(program, args, &vars);
    drop(vars);

    // Replace current process with the command
    let err = cmd.exec();

    // exec() only returns if there was an error
    bail!("Failed to execute {}: {}", program, err);
}

/// Output secrets as environment variable exports
fn cmd_env(ctx: &Ctx<'_>, prefix: Option<&KeyPath>) -> Result<()> {
    let _unlocked = ctx.unlock()?;
    let tree = ctx.session.tree()?;
    let vars = collect_env(&tree, &[], prefix)?;

    for (name, value) in vars {
        // Escape single quotes in the value
        let escaped = value.replace('\'', "'\\''");
        println!("export {}='{}'", name, escaped);
    }

    Ok(())
}

/// Change the passphrase
fn cmd_passwd(ctx: &Ctx<'_>) -> Result<()> {
    let _unlocked = ctx.unlock()?;
    if ctx.session.passphrase()?.is_none() {
        bail!("No secrets file yet at {}", ctx.session.file().path().display());
    }

    let prompt = TerminalPrompt;
    let new = prompt.prompt_password("New passphrase: ")?;
    let confirm = prompt.prompt_password("Repeat new passphrase: ")?;
    if new != confirm {
        bail!("Passphrases do not match");
    }

    ctx.session.rekey(&new)?;
    println!("success: Passphrase changed");
    Ok(())
}

/// Show the resolved file
fn cmd_path(ctx: &Ctx<'_>) -> Result<()> {
    let file = ctx.session.file();
    println!("{}", file.path().display());

    match file.envelope_version()? {
        Some(version) => println!("  format: {}", version),
        None => println!("  (does not exist yet)"),
    }
    Ok(())
}

fn collect_env(
    tree: &SecretsTree,
    bindings: &[EnvBinding],
    prefix: Option<&KeyPath>,
) -> Result<Vec<(String, String)>> {
    let mut vars = Vec::new();
    if bindings.is_empty() || prefix.is_some() {
        vars.extend(inject::flatten(tree, prefix)?);
    }
    vars.extend(inject::resolve_bindings(tree, bindings)?);
    Ok(vars)
}

fn render_tree(tree: &SecretsTree) -> Result<String> {
    let bytes = codec::serialize(tree)?;
    Ok(String::from_utf8(bytes)?.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbox::KdfParams;
    use std::cell::Cell;
    use std::rc::Rc;
    use tempfile::TempDir;

    fn seeded(tmp: &TempDir) -> SecretsFile {
        let file = SecretsFile::new(tmp.path().join("vault"))
            .with_kdf(KdfParams::with_iterations(1_000));
        let tree: SecretsTree = serde_yaml::from_str("api:\n  openai: sk-1\n").unwrap();
        file.write(&tree, &Passphrase::from("pw")).unwrap();
        file
    }

    /// Prompt answering from `answers` in turn (repeating the last) and
    /// counting calls
    fn scripted(
        answers: &'static [&'static str],
        calls: Rc<Cell<usize>>,
    ) -> Box<dyn PasswordPrompt> {
        Box::new(move |_: &str| -> Result<Passphrase> {
            let n = calls.get();
            calls.set(n + 1);
            Ok(Passphrase::from(answers[n.min(answers.len() - 1)]))
        })
    }

    #[test]
    fn test_unlock_retries_when_interactive() {
        let tmp = TempDir::new().unwrap();
        let calls = Rc::new(Cell::new(0));
        let session = Session::new(seeded(&tmp), scripted(&["wrong"], calls.clone()));
        let config = VaultConfig::default();
        let ctx = Ctx {
            session: &session,
            config: &config,
            interactive: true,
        };

        let err = ctx.unlock().err().unwrap();
        assert!(VaultError::is_authentication(&err));
        assert_eq!(calls.get(), MAX_ATTEMPTS);
        assert!(!session.is_unlocked());
    }

    #[test]
    fn test_unlock_recovers_after_typo() {
        let tmp = TempDir::new().unwrap();
        let calls = Rc::new(Cell::new(0));
        let session = Session::new(seeded(&tmp), scripted(&["typo", "pw"], calls.clone()));
        let config = VaultConfig::default();
        let ctx = Ctx {
            session: &session,
            config: &config,
            interactive: true,
        };

        let _unlocked = ctx.unlock().unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_unlock_does_not_retry_without_prompt() {
        let tmp = TempDir::new().unwrap();
        let calls = Rc::new(Cell::new(0));
        let session = Session::new(seeded(&tmp), scripted(&["wrong"], calls.clone()));
        let config = VaultConfig::default();
        let ctx = Ctx {
            session: &session,
            config: &config,
            interactive: false,
        };

        let err = ctx.unlock().err().unwrap();
        assert!(VaultError::is_authentication(&err));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_whole_tree_commands() {
        let tmp = TempDir::new().unwrap();
        let calls = Rc::new(Cell::new(0));
        let session = Session::new(seeded(&tmp), scripted(&["pw"], calls.clone()));
        let config = VaultConfig::default();
        let ctx = Ctx {
            session: &session,
            config: &config,
            interactive: false,
        };

        cmd_get(&ctx, None, false).unwrap();
        cmd_env(&ctx, None).unwrap();
        cmd_inspect(&ctx, None).unwrap();
        assert_eq!(calls.get(), 3);

        let missing = KeyPath::parse("api/none").unwrap();
        let err = cmd_get(&ctx, Some(&missing), false).unwrap_err();
        assert!(matches!(VaultError::kind(&err), Some(VaultError::NotFound(_))));
    }

    #[test]
    fn test_cli_parse() {
        let cli = Cli::try_parse_from(["lockbox", "get", "api/openai"]).unwrap();
        if let Some(Commands::Get { path, no_newline }) = cli.command {
            assert_eq!(path.unwrap().to_string(), "api/openai");
            assert!(!no_newline);
        } else {
            panic!("Expected Get command");
        }

        let cli = Cli::try_parse_from(["lockbox", "get", "-n", "[db, 5432]"]).unwrap();
        if let Some(Commands::Get { path, no_newline }) = cli.command {
            assert_eq!(path.unwrap().segments()[1], Value::from(5432));
            assert!(no_newline);
        } else {
            panic!("Expected Get command");
        }

        let cli = Cli::try_parse_from(["lockbox", "set", "api/key", "value", "--raw"]).unwrap();
        if let Some(Commands::Set { path, value, raw }) = cli.command {
            assert_eq!(path.to_string(), "api/key");
            assert_eq!(value, Some("value".to_string()));
            assert!(raw);
        } else {
            panic!("Expected Set command");
        }

        let cli = Cli::try_parse_from(["lockbox"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "lockbox",
            "delete",
            "a/b",
            "--file",
            "/tmp/vault",
            "--passphrase-env",
            "VAULT_PASS",
        ])
        .unwrap();
        assert_eq!(cli.file, Some(PathBuf::from("/tmp/vault")));
        assert_eq!(cli.passphrase_env.as_deref(), Some("VAULT_PASS"));
        assert!(matches!(cli.command, Some(Commands::Delete { .. })));
    }

    #[test]
    fn test_cli_rejects_malformed_path() {
        assert!(Cli::try_parse_from(["lockbox", "delete", "a//b"]).is_err());
        assert!(Cli::try_parse_from(["lockbox", "get", "[a, {b: 1}]"]).is_err());
    }

    #[test]
    fn test_cli_update() {
        let cli = Cli::try_parse_from([
            "lockbox",
            "update",
            "--set",
            "db/port=5432",
            "--set",
            "db/user=admin",
            "--delete",
            "old/key",
            "--merge",
            "{x: 1}",
            "--at",
            "svc",
        ])
        .unwrap();
        if let Some(Commands::Update {
            sets,
            deletes,
            merge,
            at,
        }) = cli.command
        {
            assert_eq!(sets.len(), 2);
            assert_eq!(sets[0].1, Value::from(5432));
            assert_eq!(deletes[0].to_string(), "old/key");
            assert_eq!(merge.as_deref(), Some("{x: 1}"));
            assert_eq!(at.unwrap().to_string(), "svc");
        } else {
            panic!("Expected Update command");
        }

        assert!(Cli::try_parse_from(["lockbox", "update", "--set", "no-equals"]).is_err());
    }

    #[test]
    fn test_cli_exec() {
        let cli = Cli::try_parse_from([
            "lockbox", "exec", "-e", "KEY=api/openai", "--", "npm", "run", "dev",
        ])
        .unwrap();
        if let Some(Commands::Exec {
            bindings,
            prefix,
            command,
        }) = cli.command
        {
            assert_eq!(bindings[0].name, "KEY");
            assert!(prefix.is_none());
            assert_eq!(command, vec!["npm", "run", "dev"]);
        } else {
            panic!("Expected Exec command");
        }
    }

    #[test]
    fn test_collect_env() {
        let tree: SecretsTree =
            serde_yaml::from_str("api:\n  openai: sk-1\ndb:\n  pass: x\n").unwrap();

        let all = collect_env(&tree, &[], None).unwrap();
        assert_eq!(all.len(), 2);

        let only: Vec<EnvBinding> = vec!["K=api/openai".parse().unwrap()];
        let bound = collect_env(&tree, &only, None).unwrap();
        assert_eq!(bound, vec![("K".to_string(), "sk-1".to_string())]);

        let prefix = KeyPath::parse("db").unwrap();
        let both = collect_env(&tree, &only, Some(&prefix)).unwrap();
        assert_eq!(
            both,
            vec![
                ("PASS".to_string(), "x".to_string()),
                ("K".to_string(), "sk-1".to_string()),
            ]
        );
    }
}
