use fluent_bundle::{FluentArgs, FluentBundle, FluentResource, FluentValue};
use unic_langid::LanguageIdentifier;

const EN_GB: &str = include_str!("../i18n/en-GB.ftl");

/// Shell message catalog. Unknown codes and broken patterns fall back to the
/// code itself so a transcript line is never lost.
pub struct FluentLoc {
    bundle: FluentBundle<FluentResource>,
}

impl FluentLoc {
    /// Catalog for `lang`; only en-GB ships today, so other tags reuse it.
    pub fn builtin(lang: &str) -> Self {
        let langid: LanguageIdentifier =
            lang.parse().or_else(|_| "en-GB".parse()).unwrap_or_default();
        let mut bundle = FluentBundle::new(vec![langid]);
        // Transcripts are plain text; no bidi isolation marks around arguments.
        bundle.set_use_isolating(false);
        match FluentResource::try_new(EN_GB.to_owned()) {
            Ok(res) => {
                if let Err(errs) = bundle.add_resource(res) {
                    tracing::warn!(count = errs.len(), "duplicate shell messages ignored");
                }
            }
            Err((res, errs)) => {
                tracing::warn!(count = errs.len(), "shell messages partially parsed");
                let _ = bundle.add_resource(res);
            }
        }
        Self { bundle }
    }

    /// Catalog chosen from `CHUNKBOX_LANG`, else en-GB.
    pub fn from_env() -> Self {
        let lang = std::env::var("CHUNKBOX_LANG").unwrap_or_else(|_| "en-GB".to_string());
        Self::builtin(&lang)
    }

    pub fn lookup(&self, code: &str, args: &[(&str, &str)]) -> Option<String> {
        let pattern = self.bundle.get_message(code)?.value()?;
        let mut fa = FluentArgs::new();
        for (k, v) in args {
            fa.set(*k, FluentValue::from(*v));
        }
        let mut errs = vec![];
        let s = self.bundle.format_pattern(pattern, Some(&fa), &mut errs).into_owned();
        if !errs.is_empty() {
            tracing::debug!(code, ?errs, "message formatting failed");
            return None;
        }
        Some(s)
    }

    pub fn msg(&self, code: &str, args: &[(&str, &str)]) -> String {
        self.lookup(code, args).unwrap_or_else(|| code.to_string())
    }
}

impl Default for FluentLoc {
    fn default() -> Self {
        Self::builtin("en-GB")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_without_isolation_marks() {
        let loc = FluentLoc::default();
        assert_eq!(loc.msg("unknown-command", &[("verb", "rm")]), "Unknown command: rm");
        assert_eq!(loc.msg("no-such-code", &[]), "no-such-code");
    }

    #[test]
    fn missing_argument_falls_back_to_code() {
        let loc = FluentLoc::builtin("fr-FR");
        assert_eq!(loc.lookup("unknown-command", &[]), None);
        assert_eq!(loc.msg("clear-done", &[]), FluentLoc::default().msg("clear-done", &[]));
    }
}
