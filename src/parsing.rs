//! The engine's `key=value` module argument grammar.

use indexmap::IndexMap;

/// Modules that take free-form text. Their non-option tokens are kept verbatim as
/// [RAW_PARAMS] rather than being rejected or split.
pub const RAW_PARAM_MODULES: &[&str] = &[
    "command",
    "win_command",
    "shell",
    "win_shell",
    "script",
    "raw",
];

/// The argument key under which free-form text is passed to a module.
pub const RAW_PARAMS: &str = "_raw_params";

/// Options that free-form modules accept as real `key=value` pairs. Any other `key=value` token
/// given to a free-form module is part of the command line.
const FREE_FORM_OPTIONS: &[&str] = &[
    "creates",
    "removes",
    "chdir",
    "executable",
    "warn",
    "stdin",
    "stdin_add_newline",
    "strip_empty_ends",
];

/// Returns whether `module` takes free-form arguments.
pub fn is_raw_module(module: &str) -> bool {
    RAW_PARAM_MODULES.contains(&module)
}

/// Splits an argument string on white space, keeping quoted sections (quotes included) together.
///
/// Unlike [shlex], quotes are preserved so that free-form text can be passed on unchanged.
pub fn split_args(args: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in args.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match (c, quote) {
            ('\\', _) => {
                current.push(c);
                escaped = true;
            }
            ('"' | '\'', None) => {
                current.push(c);
                quote = Some(c);
            }
            (c, Some(q)) if c == q => {
                current.push(c);
                quote = None;
            }
            (c, None) if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            (c, _) => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Removes one layer of matching surrounding quotes.
pub fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2
        && (bytes[0] == b'"' || bytes[0] == b'\'')
        && bytes[0] == bytes[bytes.len() - 1]
    {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Parses module arguments into an ordered mapping.
///
/// `key=value` tokens become entries (values unquoted). A `=` preceded by a backslash does not
/// split. Tokens that are not options are joined with spaces under [RAW_PARAMS]. When
/// `check_raw` is set, `key=value` tokens whose key is not a known free-form option are also
/// treated as raw text, so `echo a=b` survives intact.
pub fn parse_kv(args: &str, check_raw: bool) -> IndexMap<String, String> {
    let mut options = IndexMap::new();
    let mut raw_params = Vec::new();

    for token in split_args(args) {
        let split = token
            .char_indices()
            .skip(1)
            .find(|&(i, c)| c == '=' && token.as_bytes()[i - 1] != b'\\')
            .map(|(i, _)| i);

        match split {
            Some(pos) => {
                let key = &token[..pos];
                let value = &token[pos + 1..];
                if check_raw && !FREE_FORM_OPTIONS.contains(&key) {
                    raw_params.push(token);
                } else {
                    options.insert(key.trim().to_string(), unquote(value.trim()).to_string());
                }
            }
            None if token.contains("\\=") => raw_params.push(token.replace("\\=", "=")),
            None => raw_params.push(token),
        }
    }

    if !raw_params.is_empty() {
        options.insert(RAW_PARAMS.to_string(), raw_params.join(" "));
    }
    options
}
