//! Request-rewrite and response-observe hook pipeline
//!
//! Some OAuth gateways publish malformed discovery or registration URLs --
//! most commonly a `.well-known` path nested inside another `.well-known`
//! path. The hook pipeline lets the networking layer correct such URLs
//! before a request is sent, and lets diagnostics observe every response,
//! without either concern leaking into the core flow logic.
//!
//! A pipeline is an ordered list: rewriters run first-to-last, each seeing
//! the output of the previous one. The core functions identically with zero
//! hooks registered.
//!
//! The `MCP_TETHER_NO_URL_FIXUPS` environment variable disables the built-in
//! URL corrections entirely, for operators whose servers conform to spec and
//! would be mis-corrected.

use url::Url;

/// Environment variable that disables all built-in URL-correction hooks.
pub const NO_URL_FIXUPS_ENV: &str = "MCP_TETHER_NO_URL_FIXUPS";

/// A request-URL rewriter. Returns `Some(rewritten)` to replace the URL, or
/// `None` to leave it untouched.
type RequestRewriter = Box<dyn Fn(&Url) -> Option<Url> + Send + Sync>;

/// A response observer, invoked with the final URL and HTTP status of every
/// outbound call made through the pipeline.
type ResponseObserver = Box<dyn Fn(&Url, u16) + Send + Sync>;

/// An explicit, ordered hook pipeline for outbound authorization requests.
///
/// Construct with [`HookPipeline::standard`] (built-in corrections, honoring
/// the opt-out switch) or [`HookPipeline::empty`] (no hooks at all), then
/// extend with [`with_rewriter`](Self::with_rewriter) /
/// [`with_observer`](Self::with_observer) as needed.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use mcp_tether::net::HookPipeline;
///
/// let pipeline = HookPipeline::empty().with_rewriter("force-https", |url| {
///     if url.scheme() == "http" {
///         let mut fixed = url.clone();
///         fixed.set_scheme("https").ok()?;
///         Some(fixed)
///     } else {
///         None
///     }
/// });
///
/// let out = pipeline.apply(Url::parse("http://auth.example.com/token").unwrap());
/// assert_eq!(out.scheme(), "https");
/// ```
pub struct HookPipeline {
    rewriters: Vec<(String, RequestRewriter)>,
    observers: Vec<ResponseObserver>,
}

impl std::fmt::Debug for HookPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookPipeline")
            .field(
                "rewriters",
                &self.rewriters.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Default for HookPipeline {
    fn default() -> Self {
        Self::standard()
    }
}

impl HookPipeline {
    /// A pipeline with no hooks registered. Every URL passes through
    /// unmodified and no observer is invoked.
    pub fn empty() -> Self {
        Self {
            rewriters: Vec::new(),
            observers: Vec::new(),
        }
    }

    /// The standard pipeline: built-in URL corrections for known-malformed
    /// OAuth gateway URLs.
    ///
    /// When [`NO_URL_FIXUPS_ENV`] is set (to any non-empty value) the
    /// corrections are omitted and this is equivalent to
    /// [`HookPipeline::empty`].
    pub fn standard() -> Self {
        if std::env::var(NO_URL_FIXUPS_ENV).map_or(false, |v| !v.is_empty()) {
            return Self::empty();
        }

        Self::empty().with_rewriter("collapse-nested-well-known", collapse_nested_well_known)
    }

    /// Appends a named request rewriter. Rewriters run in registration order;
    /// each sees the output of the previous one.
    pub fn with_rewriter<F>(mut self, name: &str, rewriter: F) -> Self
    where
        F: Fn(&Url) -> Option<Url> + Send + Sync + 'static,
    {
        self.rewriters.push((name.to_string(), Box::new(rewriter)));
        self
    }

    /// Appends a response observer.
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&Url, u16) + Send + Sync + 'static,
    {
        self.observers.push(Box::new(observer));
        self
    }

    /// Runs all rewriters over `url` in order and returns the final URL.
    ///
    /// Each rewrite that fires is logged at `DEBUG` with the hook's name,
    /// the original, and the replacement.
    pub fn apply(&self, url: Url) -> Url {
        let mut current = url;
        for (name, rewriter) in &self.rewriters {
            if let Some(rewritten) = rewriter(&current) {
                tracing::debug!(
                    hook = %name,
                    from = %current,
                    to = %rewritten,
                    "request URL rewritten"
                );
                current = rewritten;
            }
        }
        current
    }

    /// Notifies all observers of a completed call.
    pub fn observe(&self, url: &Url, status: u16) {
        for observer in &self.observers {
            observer(url, status);
        }
    }
}

/// Collapses a double-nested `.well-known` path to its single-nested form.
///
/// Some gateways construct discovery URLs by joining a well-known suffix
/// onto a URL that already carries one, yielding paths like
/// `/.well-known/oauth-authorization-server/.well-known/openid-configuration`.
/// Everything from the second `.well-known` segment onward is dropped.
/// Returns `None` when the path contains fewer than two `.well-known`
/// segments.
fn collapse_nested_well_known(url: &Url) -> Option<Url> {
    let segments: Vec<&str> = url.path_segments()?.collect();
    let mut seen = 0usize;
    let mut cut = None;
    for (i, segment) in segments.iter().enumerate() {
        if *segment == ".well-known" {
            seen += 1;
            if seen == 2 {
                cut = Some(i);
                break;
            }
        }
    }
    let cut = cut?;

    let mut fixed = url.clone();
    fixed.set_path(&segments[..cut].join("/"));
    Some(fixed)
}
