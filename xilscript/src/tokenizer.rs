use std::io::Write;
use std::path::Path;
use tempfile::{NamedTempFile, TempPath};
use thiserror::Error;

use crate::commands::{CommandRegistry, RawMode};
use crate::filecache::Cursor;
use crate::host::ScriptHost;
use crate::paramlist::ParamLists;

pub(crate) const MAX_PARAMS: usize = 100;
pub(crate) const MAX_LABEL_LEN: usize = 255;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TokenizerError {
    #[error("{filename}:{line}: end of file inside a /* */ comment")]
    UnclosedComment { filename: String, line: u32 },

    #[error("{filename}:{line}: end of comment */ without corresponding /*")]
    UnexpectedCommentEnd { filename: String, line: u32 },

    #[error("{filename}:{line}: end of file reached inside a label")]
    EndOfFileInLabel { filename: String, line: u32 },

    #[error("{filename}:{line}: label exceeds {MAX_LABEL_LEN} chars")]
    LabelTooLong { filename: String, line: u32 },

    #[error("{filename}:{line}: command should start with an alphabetic character or '_'")]
    InvalidCommandStart { filename: String, line: u32 },

    #[error("{filename}:{line}: unknown command \"{name}\"")]
    UnknownCommand {
        filename: String,
        line: u32,
        name: String,
    },

    #[error("{filename}:{line}: expecting a '(' bracket on command \"{command}\"")]
    MissingOpenBracket {
        filename: String,
        line: u32,
        command: String,
    },

    #[error("{filename}:{line}: expecting a ')' bracket on command \"{command}\"")]
    MissingCloseBracket {
        filename: String,
        line: u32,
        command: String,
    },

    #[error("{filename}:{line}: unexpected end of file in double quoted parameter")]
    UnclosedString { filename: String, line: u32 },

    #[error("{filename}:{line}: unexpected end of file in parameter (missing bracket)")]
    UnclosedParameter { filename: String, line: u32 },

    #[error("{filename}:{line}: there are unexpected chars behind parameter")]
    UnexpectedChars { filename: String, line: u32 },

    #[error("{filename}:{line}: there are unexpected chars inside parameter list name")]
    InvalidParamListName { filename: String, line: u32 },

    #[error("{filename}:{line}: the parameter list \"{name}\" is unknown")]
    UnknownParamList {
        filename: String,
        line: u32,
        name: String,
    },

    #[error("{filename}:{line}: command has more than {MAX_PARAMS} parameters")]
    ParameterLimit { filename: String, line: u32 },

    #[error("{filename}:{line}: end of file inside of an embedded file")]
    UnclosedEmbeddedFile { filename: String, line: u32 },

    #[error("{filename}:{line}: cannot write embedded file: {ioerror}")]
    EmbeddedFileError {
        filename: String,
        line: u32,
        ioerror: std::io::Error,
    },

    #[error(
        "{filename}:{line}: command \"{command}\" has less parameters ({count}) as expected ({expected})"
    )]
    TooFewParameters {
        filename: String,
        line: u32,
        command: String,
        count: usize,
        expected: usize,
    },

    #[error(
        "{filename}:{line}: command \"{command}\" has more parameters ({count}) as expected ({expected})"
    )]
    TooManyParameters {
        filename: String,
        line: u32,
        command: String,
        count: usize,
        expected: usize,
    },
}

/// One parameter after environment variable substitution
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Param {
    pub(crate) text: String,
    pub(crate) env_solved: u32,
    pub(crate) env_unsolved: u32,
}

impl Param {
    fn verbatim(text: String) -> Self {
        Self {
            text,
            env_solved: 0,
            env_unsolved: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LabelToken {
    pub(crate) name: String,
    pub(crate) line: u32,
}

#[derive(Debug)]
pub(crate) struct TokenizedCommand {
    pub(crate) cmd: usize,
    /// labels in front of the command
    pub(crate) labels: Vec<LabelToken>,
    /// position of the command name, the instruction is tokenized again from here when it runs
    pub(crate) offset: usize,
    pub(crate) line: u32,
    pub(crate) params: Vec<Param>,
    /// only written when the command is executed
    pub(crate) embedded_file: Option<TempPath>,
    pub(crate) has_embedded_file: bool,
    pub(crate) has_param_list: bool,
}

impl TokenizedCommand {
    pub(crate) fn param(&self, idx: usize) -> &str {
        self.params.get(idx).map_or("", |param| param.text.as_str())
    }

    /// Number of parameters; an embedded file counts as one
    pub(crate) fn param_count(&self) -> usize {
        self.params.len() + usize::from(self.has_embedded_file)
    }
}

/// Everything the tokenizer needs besides the text
pub(crate) struct TokenizerEnv<'a> {
    pub(crate) registry: &'a CommandRegistry,
    pub(crate) host: &'a dyn ScriptHost,
    /// `None` during the parse pass: `$[name]` splices nothing and embedded files are not written
    pub(crate) param_lists: Option<&'a ParamLists>,
    pub(crate) temp_dir: Option<&'a Path>,
    pub(crate) filename: &'a str,
}

enum ScanResult {
    More,
    Last,
}

// parse_next_command()
// Read the labels, the command and all parameters of the next command in the file.
// At the end of the file the EOF command is returned.
pub(crate) fn parse_next_command(
    cursor: &mut Cursor,
    env: &TokenizerEnv,
) -> Result<TokenizedCommand, TokenizerError> {
    let mut labels = Vec::new();
    skip_whitespace_and_comments(cursor, env)?;
    while cursor.peek() == Some(b':') {
        cursor.getc();
        labels.push(parse_label(cursor, env)?);
        skip_whitespace_and_comments(cursor, env)?;
    }

    let (offset, line) = cursor.tell();
    let mut tokenized = TokenizedCommand {
        cmd: env.registry.eof(),
        labels,
        offset,
        line,
        params: Vec::new(),
        embedded_file: None,
        has_embedded_file: false,
        has_param_list: false,
    };
    let Some(first) = cursor.getc() else {
        return Ok(tokenized);
    };
    if !first.is_ascii_alphabetic() && first != b'_' {
        return Err(TokenizerError::InvalidCommandStart {
            filename: env.filename.to_string(),
            line,
        });
    }
    cursor.unget();
    let name = read_identifier(cursor);

    let Some(cmd) = env.registry.lookup(&name) else {
        if is_assignment(cursor) {
            tokenized.cmd = env.registry.set_command();
            let rest = read_rest_of_line(cursor, env)?;
            tokenized
                .params
                .push(substitute_env(&format!("{name} {rest}"), env));
            return Ok(tokenized);
        }
        return Err(TokenizerError::UnknownCommand {
            filename: env.filename.to_string(),
            line,
            name,
        });
    };
    tokenized.cmd = cmd;

    let descriptor = env.registry.descriptor(cmd);
    if descriptor.raw == RawMode::None {
        scan_command_parameters(cursor, env, &mut tokenized, descriptor.named)?;
        if descriptor.embedded_file {
            scan_embedded_file(cursor, env, &mut tokenized)?;
        }
    } else {
        scan_raw_parameters(cursor, env, &mut tokenized, descriptor.raw)?;
    }

    if env.param_lists.is_some() || !tokenized.has_param_list {
        check_parameter_count(&tokenized, env, line)?;
    }
    Ok(tokenized)
}

fn check_parameter_count(
    tokenized: &TokenizedCommand,
    env: &TokenizerEnv,
    line: u32,
) -> Result<(), TokenizerError> {
    let descriptor = env.registry.descriptor(tokenized.cmd);
    let count = tokenized.param_count();
    if count < descriptor.min_params {
        return Err(TokenizerError::TooFewParameters {
            filename: env.filename.to_string(),
            line,
            command: descriptor.name.to_string(),
            count,
            expected: descriptor.min_params,
        });
    }
    if count > descriptor.max_params {
        return Err(TokenizerError::TooManyParameters {
            filename: env.filename.to_string(),
            line,
            command: descriptor.name.to_string(),
            count,
            expected: descriptor.max_params,
        });
    }
    Ok(())
}

// skip_whitespace_and_comments()
// Comments are either C++ line comments or C block comments, which may be nested
fn skip_whitespace_and_comments(
    cursor: &mut Cursor,
    env: &TokenizerEnv,
) -> Result<(), TokenizerError> {
    while let Some(c) = cursor.getc() {
        if c.is_ascii_whitespace() {
            continue;
        }
        match (c, cursor.peek()) {
            (b'/', Some(b'*')) => {
                cursor.getc();
                skip_block_comment(cursor, env)?;
            }
            (b'/', Some(b'/')) => skip_line_comment(cursor),
            (b'*', Some(b'/')) => {
                return Err(TokenizerError::UnexpectedCommentEnd {
                    filename: env.filename.to_string(),
                    line: cursor.tell().1,
                });
            }
            _ => {
                cursor.unget();
                return Ok(());
            }
        }
    }
    Ok(())
}

// skip_block_comment()
// Called after the opening "/*"
fn skip_block_comment(cursor: &mut Cursor, env: &TokenizerEnv) -> Result<(), TokenizerError> {
    let mut nesting = 1;
    while nesting > 0 {
        match cursor.getc() {
            None => {
                return Err(TokenizerError::UnclosedComment {
                    filename: env.filename.to_string(),
                    line: cursor.tell().1,
                });
            }
            Some(b'/') if cursor.peek() == Some(b'*') => {
                cursor.getc();
                nesting += 1;
            }
            Some(b'*') if cursor.peek() == Some(b'/') => {
                cursor.getc();
                nesting -= 1;
            }
            _ => {}
        }
    }
    Ok(())
}

fn skip_line_comment(cursor: &mut Cursor) {
    while let Some(c) = cursor.getc() {
        if c == b'\n' {
            break;
        }
    }
}

fn is_ident_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

fn read_identifier(cursor: &mut Cursor) -> String {
    let mut name = String::new();
    while let Some(c) = cursor.getc() {
        if is_ident_char(c) {
            name.push(char::from(c));
        } else {
            cursor.unget();
            break;
        }
    }
    name
}

// parse_label()
// Called after the ':'. Labels consist of alphanumeric characters and '_'
fn parse_label(cursor: &mut Cursor, env: &TokenizerEnv) -> Result<LabelToken, TokenizerError> {
    let line = cursor.tell().1;
    if cursor.at_end() {
        return Err(TokenizerError::EndOfFileInLabel {
            filename: env.filename.to_string(),
            line,
        });
    }
    let name = read_identifier(cursor);
    if name.len() >= MAX_LABEL_LEN {
        return Err(TokenizerError::LabelTooLong {
            filename: env.filename.to_string(),
            line,
        });
    }
    Ok(LabelToken { name, line })
}

// is_assignment()
// An unknown identifier followed by a single '=' is the short form of SET
fn is_assignment(cursor: &mut Cursor) -> bool {
    let (pos, line) = cursor.tell();
    let mut result = false;
    while let Some(c) = cursor.getc() {
        if c == b' ' || c == b'\t' {
            continue;
        }
        result = c == b'=' && cursor.peek() != Some(b'=');
        break;
    }
    cursor.seek(pos, line);
    result
}

// read_rest_of_line()
// The text up to the end of the line. Comments are dropped, a block comment counts as a space.
fn read_rest_of_line(cursor: &mut Cursor, env: &TokenizerEnv) -> Result<String, TokenizerError> {
    let mut text = Vec::new();
    while let Some(c) = cursor.getc() {
        match (c, cursor.peek()) {
            (b'\n', _) => break,
            (b'/', Some(b'/')) => {
                skip_line_comment(cursor);
                break;
            }
            (b'/', Some(b'*')) => {
                cursor.getc();
                skip_block_comment(cursor, env)?;
                text.push(b' ');
            }
            _ => text.push(c),
        }
    }
    Ok(String::from_utf8_lossy(&text).trim().to_string())
}

fn scan_command_parameters(
    cursor: &mut Cursor,
    env: &TokenizerEnv,
    tokenized: &mut TokenizedCommand,
    named: bool,
) -> Result<(), TokenizerError> {
    skip_whitespace_and_comments(cursor, env)?;
    if named && cursor.peek().is_some_and(|c| c.is_ascii_alphabetic() || c == b'_') {
        let name = read_identifier(cursor);
        tokenized.params.push(Param::verbatim(name));
        skip_whitespace_and_comments(cursor, env)?;
    }
    if cursor.peek() != Some(b'(') {
        return Ok(());
    }
    cursor.getc();
    while let ScanResult::More = scan_one_parameter(cursor, env, tokenized)? {}
    Ok(())
}

fn push_param(
    tokenized: &mut TokenizedCommand,
    param: Param,
    cursor: &Cursor,
    env: &TokenizerEnv,
) -> Result<(), TokenizerError> {
    if tokenized.params.len() >= MAX_PARAMS {
        return Err(TokenizerError::ParameterLimit {
            filename: env.filename.to_string(),
            line: cursor.tell().1,
        });
    }
    tokenized.params.push(param);
    Ok(())
}

// scan_one_parameter()
// Called at the start of a parameter, after '(' or ','
fn scan_one_parameter(
    cursor: &mut Cursor,
    env: &TokenizerEnv,
    tokenized: &mut TokenizedCommand,
) -> Result<ScanResult, TokenizerError> {
    skip_whitespace_and_comments(cursor, env)?;
    match cursor.peek() {
        Some(b'"') => {
            cursor.getc();
            scan_quoted_parameter(cursor, env, tokenized)
        }
        Some(b')') => {
            cursor.getc();
            Ok(ScanResult::Last)
        }
        Some(b'$') => {
            cursor.getc();
            if cursor.peek() == Some(b'[') {
                cursor.getc();
                scan_param_list(cursor, env, tokenized)
            } else {
                cursor.unget();
                scan_bare_parameter(cursor, env, tokenized)
            }
        }
        _ => scan_bare_parameter(cursor, env, tokenized),
    }
}

// scan_separator()
// After a parameter either another parameter follows or the list ends
fn scan_separator(cursor: &mut Cursor, env: &TokenizerEnv) -> Result<ScanResult, TokenizerError> {
    skip_whitespace_and_comments(cursor, env)?;
    match cursor.getc() {
        Some(b',') => Ok(ScanResult::More),
        Some(b')') => Ok(ScanResult::Last),
        _ => Err(TokenizerError::UnexpectedChars {
            filename: env.filename.to_string(),
            line: cursor.tell().1,
        }),
    }
}

// scan_quoted_parameter()
// Called after the opening '"'. Adjacent quoted strings are joined: "a" "b" is the parameter ab
fn scan_quoted_parameter(
    cursor: &mut Cursor,
    env: &TokenizerEnv,
    tokenized: &mut TokenizedCommand,
) -> Result<ScanResult, TokenizerError> {
    let mut text = Vec::new();
    loop {
        match cursor.getc() {
            None => {
                return Err(TokenizerError::UnclosedString {
                    filename: env.filename.to_string(),
                    line: cursor.tell().1,
                });
            }
            Some(b'\\') if cursor.peek() == Some(b'"') => {
                cursor.getc();
                text.push(b'"');
            }
            Some(b'"') => {
                skip_whitespace_and_comments(cursor, env)?;
                if cursor.peek() == Some(b'"') {
                    cursor.getc();
                    continue;
                }
                let param = substitute_env(&String::from_utf8_lossy(&text), env);
                push_param(tokenized, param, cursor, env)?;
                return scan_separator(cursor, env);
            }
            Some(c) => text.push(c),
        }
    }
}

// scan_param_list()
// Called after "$[". The name of the list may contain environment variables
fn scan_param_list(
    cursor: &mut Cursor,
    env: &TokenizerEnv,
    tokenized: &mut TokenizedCommand,
) -> Result<ScanResult, TokenizerError> {
    let mut name = String::new();
    loop {
        match cursor.getc() {
            Some(c) if is_ident_char(c) || c == b'%' => {
                name.push(char::from(c));
                if name.len() >= MAX_LABEL_LEN {
                    return Err(TokenizerError::InvalidParamListName {
                        filename: env.filename.to_string(),
                        line: cursor.tell().1,
                    });
                }
            }
            Some(b']') => break,
            _ => {
                return Err(TokenizerError::InvalidParamListName {
                    filename: env.filename.to_string(),
                    line: cursor.tell().1,
                });
            }
        }
    }
    let name = substitute_env(&name, env).text;
    tokenized.has_param_list = true;
    if let Some(param_lists) = env.param_lists {
        let Some(list) = param_lists.get(&name) else {
            return Err(TokenizerError::UnknownParamList {
                filename: env.filename.to_string(),
                line: cursor.tell().1,
                name,
            });
        };
        for item in list {
            push_param(tokenized, Param::verbatim(item.clone()), cursor, env)?;
        }
    }
    scan_separator(cursor, env)
}

// scan_bare_parameter()
// An unquoted parameter ends at a ',' or ')' outside of any brackets. Whitespace inside of the
// parameter is kept, trailing whitespace is dropped.
fn scan_bare_parameter(
    cursor: &mut Cursor,
    env: &TokenizerEnv,
    tokenized: &mut TokenizedCommand,
) -> Result<ScanResult, TokenizerError> {
    let mut text = Vec::new();
    let mut nesting = 0u32;
    let mut in_string = false;
    let result = loop {
        let Some(c) = cursor.getc() else {
            return Err(TokenizerError::UnclosedParameter {
                filename: env.filename.to_string(),
                line: cursor.tell().1,
            });
        };
        if in_string {
            if c == b'"' {
                in_string = false;
            }
        } else {
            match c {
                b'"' => in_string = true,
                b'(' | b'[' | b'{' => nesting += 1,
                b')' if nesting == 0 => break ScanResult::Last,
                b',' if nesting == 0 => break ScanResult::More,
                b')' | b']' | b'}' => nesting = nesting.saturating_sub(1),
                _ => {}
            }
        }
        text.push(c);
    };
    let trimmed = String::from_utf8_lossy(&text).trim_end().to_string();
    push_param(tokenized, substitute_env(&trimmed, env), cursor, env)?;
    Ok(result)
}

// scan_raw_parameters()
// Raw commands take the text between the brackets verbatim, it must end on the same line
fn scan_raw_parameters(
    cursor: &mut Cursor,
    env: &TokenizerEnv,
    tokenized: &mut TokenizedCommand,
    mode: RawMode,
) -> Result<(), TokenizerError> {
    let command = env.registry.name(tokenized.cmd).to_string();
    skip_whitespace_and_comments(cursor, env)?;
    if cursor.getc() != Some(b'(') {
        return Err(TokenizerError::MissingOpenBracket {
            filename: env.filename.to_string(),
            line: cursor.tell().1,
            command,
        });
    }
    let (start, start_line) = cursor.tell();
    let mut line_text = Vec::new();
    while let Some(c) = cursor.getc() {
        if c == b'\n' {
            break;
        }
        line_text.push(c);
    }
    let Some(last_close) = line_text.iter().rposition(|c| *c == b')') else {
        return Err(TokenizerError::MissingCloseBracket {
            filename: env.filename.to_string(),
            line: start_line,
            command,
        });
    };
    let first_comma = line_text.iter().position(|c| *c == b',');

    match (mode, first_comma) {
        (RawMode::FirstParam, Some(comma)) => {
            let first = String::from_utf8_lossy(&line_text[..comma]).into_owned();
            push_param(tokenized, substitute_env(&first, env), cursor, env)?;
            // the remaining parameters are read like those of any other command
            cursor.seek(start, start_line);
            for _ in 0..=comma {
                cursor.getc();
            }
            while let ScanResult::More = scan_one_parameter(cursor, env, tokenized)? {}
        }
        _ => {
            let text = String::from_utf8_lossy(&line_text[..last_close]).into_owned();
            let param = if mode == RawMode::FirstParam {
                substitute_env(&text, env)
            } else {
                Param::verbatim(text)
            };
            push_param(tokenized, param, cursor, env)?;
            cursor.seek(start, start_line);
            for _ in 0..=last_close {
                cursor.getc();
            }
        }
    }
    Ok(())
}

// scan_embedded_file()
// An optional block "{ ... }" behind the parameters. Its content is written to a temporary file
// when the command is executed.
fn scan_embedded_file(
    cursor: &mut Cursor,
    env: &TokenizerEnv,
    tokenized: &mut TokenizedCommand,
) -> Result<(), TokenizerError> {
    skip_whitespace_and_comments(cursor, env)?;
    if cursor.peek() != Some(b'{') {
        return Ok(());
    }
    cursor.getc();
    let start_line = cursor.tell().1;
    let mut content = Vec::new();
    loop {
        match cursor.getc() {
            None => {
                return Err(TokenizerError::UnclosedEmbeddedFile {
                    filename: env.filename.to_string(),
                    line: start_line,
                });
            }
            Some(b'}') => break,
            Some(b'/') if cursor.peek() == Some(b'*') => {
                cursor.getc();
                skip_block_comment(cursor, env)?;
            }
            Some(b'/') if cursor.peek() == Some(b'/') => {
                skip_line_comment(cursor);
                content.push(b'\n');
            }
            Some(c) => content.push(c),
        }
    }
    tokenized.has_embedded_file = true;
    if env.param_lists.is_some() {
        let text = substitute_env(&String::from_utf8_lossy(&content), env).text;
        tokenized.embedded_file = Some(write_temp_file(env, start_line, text.as_bytes())?);
    }
    Ok(())
}

fn write_temp_file(
    env: &TokenizerEnv,
    line: u32,
    content: &[u8],
) -> Result<TempPath, TokenizerError> {
    let make_error = |ioerror| TokenizerError::EmbeddedFileError {
        filename: env.filename.to_string(),
        line,
        ioerror,
    };
    let mut file = match env.temp_dir {
        Some(dir) => NamedTempFile::new_in(dir),
        None => NamedTempFile::new(),
    }
    .map_err(make_error)?;
    file.write_all(content).map_err(make_error)?;
    Ok(file.into_temp_path())
}

// substitute_env()
// Replace %NAME% by the value of the environment variable NAME. References that cannot be
// resolved stay in the text and are counted.
pub(crate) fn substitute_env(text: &str, env: &TokenizerEnv) -> Param {
    let mut result = String::with_capacity(text.len());
    let mut env_solved = 0;
    let mut env_unsolved = 0;
    let mut rest = text;
    while let Some(start) = rest.find('%') {
        result.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let name_len = after.find('%').filter(|len| {
            *len > 0
                && after[..*len]
                    .bytes()
                    .all(|c| c.is_ascii_alphanumeric() || c == b'_' || c == b'.' || c == b'-')
        });
        match name_len {
            Some(len) => {
                let name = &after[..len];
                if let Some(value) = env.host.env_var(name) {
                    result.push_str(&value);
                    env_solved += 1;
                } else {
                    result.push('%');
                    result.push_str(name);
                    result.push('%');
                    env_unsolved += 1;
                }
                rest = &after[len + 1..];
            }
            None => {
                result.push('%');
                rest = after;
            }
        }
    }
    result.push_str(rest);
    Param {
        text: result,
        env_solved,
        env_unsolved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::LocalVariables;

    struct EnvHost;

    impl ScriptHost for EnvHost {
        fn solve_equation(&mut self, _: &str, _: &dyn LocalVariables) -> Result<f64, String> {
            Ok(0.0)
        }
        fn write_variable(&mut self, _: &str, _: f64) -> Result<(), String> {
            Ok(())
        }
        fn env_var(&self, name: &str) -> Option<String> {
            match name {
                "DIR" => Some("c:/work".to_string()),
                "LIST" => Some("L".to_string()),
                _ => None,
            }
        }
    }

    fn tokenize_all(text: &str, lists: Option<&ParamLists>) -> Result<Vec<TokenizedCommand>, TokenizerError> {
        let registry = CommandRegistry::with_builtins();
        let host = EnvHost;
        let env = TokenizerEnv {
            registry: &registry,
            host: &host,
            param_lists: lists,
            temp_dir: None,
            filename: "test.xil",
        };
        let mut cursor = Cursor::new(text.as_bytes());
        let mut result = Vec::new();
        loop {
            let cmd = parse_next_command(&mut cursor, &env)?;
            let is_eof = cmd.cmd == registry.eof();
            result.push(cmd);
            if is_eof {
                return Ok(result);
            }
        }
    }

    fn params(cmd: &TokenizedCommand) -> Vec<&str> {
        cmd.params.iter().map(|p| p.text.as_str()).collect()
    }

    #[test]
    fn comments_and_labels() {
        let cmds = tokenize_all(
            "/* outer /* nested */ still comment */\n// line\n:a :b MESSAGE(x) // c\n",
            None,
        )
        .unwrap();
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].labels.len(), 2);
        assert_eq!(cmds[0].labels[1].name, "b");
        assert_eq!(cmds[0].line, 3);
        assert_eq!(params(&cmds[0]), vec!["x"]);

        let result = tokenize_all("/* open", None);
        assert!(matches!(result, Err(TokenizerError::UnclosedComment { .. })));
        let result = tokenize_all("MESSAGE(x) */", None);
        assert!(matches!(result, Err(TokenizerError::UnexpectedCommentEnd { .. })));
    }

    #[test]
    fn parameter_forms() {
        let cmds = tokenize_all(
            "MESSAGE(\"a \\\"q\\\"\" \"b\")\nSET(x = max(1, 2) + 1  , y)\nMESSAGE()\nWHILE (1)\n",
            None,
        );
        // SET only takes one parameter
        assert!(matches!(cmds, Err(TokenizerError::TooManyParameters { count: 2, .. })));

        let cmds = tokenize_all(
            "MESSAGE(\"a \\\"q\\\"\" \"b\")\nSET(x = max(1, 2) + 1  )\nMESSAGE()\n",
            None,
        )
        .unwrap();
        assert_eq!(params(&cmds[0]), vec!["a \"q\"b"]);
        assert_eq!(params(&cmds[1]), vec!["x = max(1, 2) + 1"]);
        assert_eq!(cmds[2].params.len(), 0);

        let cmds = tokenize_all("MESSAGE(\"one \\\ntwo\")\nMESSAGE(b)\n", None).unwrap();
        assert_eq!(params(&cmds[0]), vec!["one two"]);
        assert_eq!(cmds[1].line, 3);
    }

    #[test]
    fn unexpected_end_of_parameter() {
        let result = tokenize_all("MESSAGE(\"abc", None);
        assert!(matches!(result, Err(TokenizerError::UnclosedString { .. })));
        let result = tokenize_all("MESSAGE((1, 2)", None);
        assert!(matches!(result, Err(TokenizerError::UnclosedParameter { .. })));
        let result = tokenize_all("MESSAGE(\"a\" b)", None);
        assert!(matches!(result, Err(TokenizerError::UnexpectedChars { .. })));
    }

    #[test]
    fn unknown_commands() {
        let result = tokenize_all("MESSAGEX(a)", None);
        assert!(
            matches!(result, Err(TokenizerError::UnknownCommand { ref name, .. }) if name == "MESSAGEX")
        );
        let result = tokenize_all("MESS(a)", None);
        assert!(matches!(result, Err(TokenizerError::UnknownCommand { .. })));
        let result = tokenize_all("1MESSAGE(a)", None);
        assert!(matches!(result, Err(TokenizerError::InvalidCommandStart { .. })));
        // comparison, not an assignment
        let result = tokenize_all("x == 1", None);
        assert!(matches!(result, Err(TokenizerError::UnknownCommand { .. })));
    }

    #[test]
    fn assignment_shorthand() {
        let cmds = tokenize_all("x = y + 1 // comment\nMESSAGE(z)", None).unwrap();
        let registry = CommandRegistry::with_builtins();
        assert_eq!(cmds[0].cmd, registry.set_command());
        assert_eq!(params(&cmds[0]), vec!["x = y + 1"]);
        assert_eq!(cmds[1].line, 2);

        let cmds = tokenize_all("x = y /* old: + 2 */ + 1 /* one\ntwo */\nMESSAGE(z)", None).unwrap();
        assert_eq!(params(&cmds[0]), vec!["x = y   + 1"]);
        assert_eq!(cmds[1].cmd, registry.lookup("MESSAGE").unwrap());
        assert_eq!(cmds[1].line, 3);
    }

    #[test]
    fn environment_variables() {
        let cmds = tokenize_all("MESSAGE(%DIR%/x, %NOPE%, 5 % 2)", None).unwrap();
        assert_eq!(params(&cmds[0]), vec!["c:/work/x", "%NOPE%", "5 % 2"]);
        assert_eq!(cmds[0].params[0].env_solved, 1);
        assert_eq!(cmds[0].params[1].env_unsolved, 1);
        assert_eq!(cmds[0].params[2].env_unsolved, 0);
    }

    #[test]
    fn parameter_lists() {
        // parse pass: nothing is spliced and the parameter count is not checked
        let cmds = tokenize_all("SET($[%LIST%])", None).unwrap();
        assert!(cmds[0].has_param_list);
        assert!(cmds[0].params.is_empty());

        let mut lists = ParamLists::new();
        lists.define("L", &["a".to_string(), "b".to_string()]);
        let cmds = tokenize_all("MESSAGE(x, $[L], y)", Some(&lists)).unwrap();
        assert_eq!(params(&cmds[0]), vec!["x", "a", "b", "y"]);
        let result = tokenize_all("MESSAGE($[M])", Some(&lists));
        assert!(matches!(result, Err(TokenizerError::UnknownParamList { .. })));
    }

    #[test]
    fn raw_parameters() {
        let cmds = tokenize_all(
            "REPORT_RAW(a, \"b\" (c))  \nREPORT_RAW_PAR(%DIR% %i, 1 + 2, \"x\")\n",
            None,
        )
        .unwrap();
        assert_eq!(params(&cmds[0]), vec!["a, \"b\" (c)"]);
        assert_eq!(params(&cmds[1]), vec!["c:/work %i", "1 + 2", "x"]);
        assert_eq!(cmds[2].line, 3);

        let result = tokenize_all("REPORT_RAW a", None);
        assert!(matches!(result, Err(TokenizerError::MissingOpenBracket { .. })));
        let result = tokenize_all("REPORT_RAW(a\n)", None);
        assert!(matches!(result, Err(TokenizerError::MissingCloseBracket { .. })));
    }

    #[test]
    fn named_commands() {
        let cmds = tokenize_all("DEF_PROC foo(a, *b)\nCALL_PROC foo (1, &x)\n", None).unwrap();
        assert_eq!(params(&cmds[0]), vec!["foo", "a", "*b"]);
        assert_eq!(params(&cmds[1]), vec!["foo", "1", "&x"]);
    }

    #[test]
    fn embedded_file() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CommandRegistry::with_builtins();
        let host = EnvHost;
        let lists = ParamLists::new();
        let env = TokenizerEnv {
            registry: &registry,
            host: &host,
            param_lists: Some(&lists),
            temp_dir: Some(dir.path()),
            filename: "test.xil",
        };
        let text = b"WRITE_FILE(out.txt)\n{\nline %DIR% /* gone */\n}\nMESSAGE(x)";
        let mut cursor = Cursor::new(text);
        let cmd = parse_next_command(&mut cursor, &env).unwrap();
        assert_eq!(cmd.param_count(), 2);
        let path = cmd.embedded_file.as_ref().unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content, "\nline c:/work \n");
        let cmd = parse_next_command(&mut cursor, &env).unwrap();
        assert_eq!(cmd.line, 5);
    }
}
