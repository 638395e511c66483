use anyhow::{Context, Result, bail};
use jsonex_core::{Expression, ObjectRef, Options, OptionsConfig, Scope, Value, compile_document};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
enum CliCommand {
    Compile {
        file: PathBuf,
        root: Option<PathBuf>,
        scope: Option<String>,
        config: Option<PathBuf>,
        compact: bool,
    },
    Eval {
        expression: String,
        scope: Option<String>,
    },
    Help,
}

pub fn run_from_env() -> Result<()> {
    run_from_args(env::args().skip(1).collect())
}

pub fn run_from_args(args: Vec<String>) -> Result<()> {
    let output = execute(parse_command(args)?)?;
    println!("{output}");
    Ok(())
}

fn execute(command: CliCommand) -> Result<String> {
    match command {
        CliCommand::Compile {
            file,
            root,
            scope,
            config,
            compact,
        } => run_compile(&file, root, scope, config.as_deref(), compact),
        CliCommand::Eval { expression, scope } => run_eval(&expression, scope),
        CliCommand::Help => Ok(help_text()),
    }
}

fn parse_command(args: Vec<String>) -> Result<CliCommand> {
    let Some(cmd) = args.first() else {
        return Ok(CliCommand::Help);
    };
    match cmd.as_str() {
        "compile" => parse_compile(&args),
        "eval" => parse_eval(&args),
        "help" | "--help" | "-h" => Ok(CliCommand::Help),
        other => bail!("unknown command: {other}\n\n{}", help_text()),
    }
}

fn flag_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a String> {
    args.get(i)
        .with_context(|| format!("{flag} requires a value"))
}

fn parse_compile(args: &[String]) -> Result<CliCommand> {
    let mut file: Option<PathBuf> = None;
    let mut root: Option<PathBuf> = None;
    let mut scope: Option<String> = None;
    let mut config: Option<PathBuf> = None;
    let mut compact = false;

    let mut i = 1usize;
    while i < args.len() {
        let token = &args[i];
        match token.as_str() {
            "--root" => {
                i += 1;
                root = Some(PathBuf::from(flag_value(args, i, "--root")?));
            }
            "--scope" => {
                i += 1;
                scope = Some(flag_value(args, i, "--scope")?.clone());
            }
            "--config" => {
                i += 1;
                config = Some(PathBuf::from(flag_value(args, i, "--config")?));
            }
            "--compact" => compact = true,
            x if x.starts_with("--") => bail!("unknown flag: {x}"),
            _ => {
                if file.is_some() {
                    bail!("only one FILE positional argument is allowed");
                }
                file = Some(PathBuf::from(token));
            }
        }
        i += 1;
    }

    let file = file.context("compile requires FILE")?;
    Ok(CliCommand::Compile {
        file,
        root,
        scope,
        config,
        compact,
    })
}

fn parse_eval(args: &[String]) -> Result<CliCommand> {
    let mut expression: Option<String> = None;
    let mut scope: Option<String> = None;

    let mut i = 1usize;
    while i < args.len() {
        let token = &args[i];
        match token.as_str() {
            "--scope" => {
                i += 1;
                scope = Some(flag_value(args, i, "--scope")?.clone());
            }
            x if x.starts_with("--") => bail!("unknown flag: {x}"),
            _ => {
                if expression.is_some() {
                    bail!("only one EXPRESSION positional argument is allowed");
                }
                expression = Some(token.clone());
            }
        }
        i += 1;
    }

    let expression = expression.context("eval requires EXPRESSION")?;
    Ok(CliCommand::Eval { expression, scope })
}

fn help_text() -> String {
    [
        "jsonex CLI",
        "",
        "Commands:",
        "  jsonex compile FILE [--root DIR] [--scope JSON_OR_PATH] [--config PATH] [--compact]",
        "  jsonex eval EXPRESSION [--scope JSON_OR_PATH]",
        "  jsonex help",
        "",
        "Logging is controlled by RUST_LOG (default: jsonex=warn).",
    ]
    .join("\n")
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid JSON in {}", path.display()))
}

/// Inline JSON, or the path of a JSON file when one exists under that name.
fn load_json_or_path(input: &str) -> Result<serde_json::Value> {
    let as_path = PathBuf::from(input);
    if as_path.exists() {
        return read_json(&as_path);
    }
    serde_json::from_str(input).context("invalid --scope JSON")
}

fn run_compile(
    file: &Path,
    root: Option<PathBuf>,
    scope: Option<String>,
    config: Option<&Path>,
    compact: bool,
) -> Result<String> {
    let document = read_json(file)?;

    let from_file = match config {
        Some(path) => OptionsConfig::from_json(&read_json(path)?)
            .with_context(|| format!("invalid config {}", path.display()))?,
        None => OptionsConfig::default(),
    };
    let file_dir = match file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let from_args = OptionsConfig {
        root,
        scope: scope.as_deref().map(load_json_or_path).transpose()?,
        ..OptionsConfig::default()
    };
    let defaults = OptionsConfig {
        root: Some(file_dir),
        ..OptionsConfig::default()
    };

    let mut options = from_args.or(from_file).or(defaults).into_options()?;
    if let Some(name) = file.file_name() {
        options = options.with_id(Path::new("/").join(name));
    }
    tracing::debug!(file = %file.display(), root = ?options.root(), "compiling");

    let compiled = compile_document(&document, options)
        .with_context(|| format!("failed to compile {}", file.display()))?;
    let json = compiled
        .to_json()
        .with_context(|| format!("failed to evaluate {}", file.display()))?;
    render(&json, compact)
}

fn run_eval(expression: &str, scope: Option<String>) -> Result<String> {
    let scope = match scope.as_deref().map(load_json_or_path).transpose()? {
        None => ObjectRef::new(),
        Some(json) => match Value::from_json(&json) {
            Value::Object(obj) => obj,
            other => bail!("--scope must be a JSON object, got {}", other.type_name()),
        },
    };
    let parsed = Expression::parse(expression).context("invalid expression")?;
    let value = parsed
        .evaluate(&Scope::from(scope))
        .context("evaluation failed")?;
    render(&value.to_json()?, true)
}

fn render(json: &serde_json::Value, compact: bool) -> Result<String> {
    Ok(if compact {
        serde_json::to_string(json)?
    } else {
        serde_json::to_string_pretty(json)?
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_compile_flags() {
        let command = parse_command(args(&[
            "compile", "app.json", "--root", "conf", "--scope", "{}", "--compact",
        ]))
        .expect("valid command");
        assert_eq!(
            command,
            CliCommand::Compile {
                file: PathBuf::from("app.json"),
                root: Some(PathBuf::from("conf")),
                scope: Some("{}".to_string()),
                config: None,
                compact: true,
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_command(args(&["compile"])).is_err());
        assert!(parse_command(args(&["compile", "a.json", "b.json"])).is_err());
        assert!(parse_command(args(&["compile", "a.json", "--root"])).is_err());
        assert!(parse_command(args(&["eval", "1", "--nope"])).is_err());
        assert!(parse_command(args(&["frobnicate"])).is_err());
        assert_eq!(parse_command(Vec::new()).unwrap(), CliCommand::Help);
    }

    #[test]
    fn test_compile_resolves_requires_next_to_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("base.json"), r#"{"port": 80}"#).expect("write base");
        fs::write(
            dir.path().join("app.json"),
            r#"{"name": "api", "url": "${name}:${port}", "port": {"$": "base.port + 1"}, "base": {"$require": "base.json"}}"#,
        )
        .expect("write app");

        let out = execute(CliCommand::Compile {
            file: dir.path().join("app.json"),
            root: None,
            scope: None,
            config: None,
            compact: true,
        })
        .expect("compiles");
        assert_eq!(
            out,
            r#"{"name":"api","url":"api:81","port":81,"base":{"port":80}}"#
        );
    }

    #[test]
    fn test_compile_with_config_and_scope() {
        let dir = tempfile::tempdir().expect("temp dir");
        let doc = dir.path().join("doc.json");
        let config = dir.path().join("jsonex.json");
        fs::write(&doc, r#"{"greeting": "<<who>>"}"#).expect("write doc");
        fs::write(
            &config,
            r#"{"interpolation": "<<(\\w+)>>", "scope": {"who": "config"}}"#,
        )
        .expect("write config");

        let compile = |scope: Option<&str>| {
            execute(CliCommand::Compile {
                file: doc.clone(),
                root: None,
                scope: scope.map(str::to_string),
                config: Some(config.clone()),
                compact: true,
            })
            .expect("compiles")
        };
        assert_eq!(compile(None), r#"{"greeting":"config"}"#);
        assert_eq!(compile(Some(r#"{"who": "flag"}"#)), r#"{"greeting":"flag"}"#);
    }

    #[test]
    fn test_eval_against_scope() {
        let out = execute(CliCommand::Eval {
            expression: "a.b * 2 + 1".to_string(),
            scope: Some(r#"{"a": {"b": 20}}"#.to_string()),
        })
        .expect("evaluates");
        assert_eq!(out, "41");

        let err = execute(CliCommand::Eval {
            expression: "1 / 0".to_string(),
            scope: None,
        })
        .unwrap_err();
        assert!(format!("{err:#}").contains("division by zero"));

        assert!(execute(CliCommand::Eval {
            expression: "1".to_string(),
            scope: Some("[1]".to_string()),
        })
        .is_err());
    }
}
