//! User-facing message templates. Placeholders are positional: `{0}`, `{1}`, ...

pub const VALUE_REQUIRED: &str = "[{0}] must not be empty.";
pub const VALIDATE_LENGTH: &str = "[{0}] must not exceed {1} characters";
pub const VALIDATE_LENGTH_NUM: &str =
    "[{0}] allows at most {1} integer digits and {2} decimal digits";
pub const VALIDATE_TYPE: &str = "[{1}] is not a valid value for [{0}]";
pub const NUMBER_OUT_OF_RANGE: &str = "[{1}] is out of the numeric range of [{0}]";
pub const VALIDATE_STRICT_REF: &str = "[{1}] is not an allowed value for [{0}]";
pub const REF_LOOKUP_FAILED: &str = "[{0}] could not be checked: {1}";
pub const VALIDATE_RULE: &str = "[{1}] does not match the input rule of [{0}]";
pub const TOTAL_OVERFLOW: &str = "[{0}] total is out of range";
pub const DETAIL_REQUIRED: &str = "{0} has no rows, saving is not allowed.";
pub const MULTI_FIELD_MISSING: &str = "Duplicate-check field '{0}' does not exist";
pub const DUPLICATE_ROW: &str = "Line {0}: {1}";
pub const DUPLICATE_ROW_DEFAULT: &str = "duplicate row";
pub const UPDATE_ROW_FAILED: &str = "Refreshing the row failed, check the primary key";
pub const WRONG_MASTER_ROW: &str = "wrong master row";
pub const DETAIL_SEARCH_ON_PROC: &str = "a stored procedure cannot be searched as a detail";
pub const DELETE_NO_ROW: &str = "delete cannot complete, there is no current row";

/// Substitute `{n}` placeholders with `args[n]`. Unknown placeholders are kept.
pub fn format(template: &str, args: &[&str]) -> String {
    let mut out = template.to_string();
    for (i, arg) in args.iter().enumerate() {
        out = out.replace(&format!("{{{i}}}"), arg);
    }
    out
}

/// Join messages one per line, dropping repeats while keeping first-seen order.
pub fn join_lines<I, S>(messages: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen: Vec<String> = Vec::new();
    for message in messages {
        for line in message.as_ref().lines() {
            let line = line.trim_end();
            if !line.is_empty() && !seen.iter().any(|s| s == line) {
                seen.push(line.to_string());
            }
        }
    }
    seen.join("\n")
}
