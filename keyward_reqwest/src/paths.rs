use std::fmt;

use predicates::{reflection, Predicate};
use reqwest::{Request, Url};

/// Matches requests whose path, relative to the API base, is in a fixed list
///
/// Paths are compared after stripping the path of the base URL, so that a
/// list entry of `/auth/login` matches a request to
/// `https://api.example.com/v1/auth/login` when the base URL is
/// `https://api.example.com/v1`. A trailing slash on the request path is
/// ignored.
#[derive(Clone, Debug, Default)]
pub struct PathList {
    base_path: String,
    paths: Vec<String>,
}

impl PathList {
    /// Constructs a new path list relative to `base_url`
    pub fn new<I, S>(base_url: &Url, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            base_path: base_url.path().trim_end_matches('/').to_owned(),
            paths: paths.into_iter().map(|p| normalize(p.as_ref())).collect(),
        }
    }

    /// The request path relative to the API base
    ///
    /// Paths outside the base are returned unchanged.
    pub fn relative_path<'a>(&self, url: &'a Url) -> &'a str {
        self.strip_base(url).unwrap_or_else(|| url.path())
    }

    fn strip_base<'a>(&self, url: &'a Url) -> Option<&'a str> {
        match url.path().strip_prefix(self.base_path.as_str())? {
            "" => Some("/"),
            rest if rest.starts_with('/') => Some(rest),
            _ => None,
        }
    }

    /// Whether `url` points at one of the listed paths
    pub fn matches(&self, url: &Url) -> bool {
        let path = match self.strip_base(url) {
            Some(path) => path,
            None => return false,
        };
        let path = match path.trim_end_matches('/') {
            "" => "/",
            trimmed => trimmed,
        };
        self.paths.iter().any(|p| p == path)
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_owned()
    } else {
        format!("/{}", trimmed)
    }
}

impl Predicate<Request> for PathList {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        self.matches(req.url())
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "path",
                    self.relative_path(req.url()).to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for PathList {}
impl fmt::Display for PathList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("path in [")?;
        for (i, path) in self.paths.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(path)?;
        }
        f.write_str("]")
    }
}
