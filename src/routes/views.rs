//! View-or-redirect resolution of broker destinations.
//!
//! A destination is rendered if a view of that name exists, otherwise the
//! browser is redirected to it.

use std::{collections::HashMap, io, path::Path, sync::Arc};

use axum::response::{Html, IntoResponse, Redirect, Response};

use crate::{
    auth::{Next, Transition},
    config::ViewsConfig,
};

/// Looks up views by destination name.
pub trait ViewResolver: Send + Sync {
    /// Rendered view named `name`, if one exists.
    fn view(&self, name: &str) -> Option<String>;
}

/// Treats every destination as a URL.
pub struct RedirectOnly;

impl ViewResolver for RedirectOnly {
    fn view(&self, _name: &str) -> Option<String> {
        None
    }
}

/// Serves `<name>.html` files from a directory, loaded once at startup.
pub struct FileViewResolver {
    views: HashMap<String, String>,
}

impl FileViewResolver {
    pub fn load(dir: &Path) -> io::Result<Self> {
        let mut views = HashMap::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("html") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            views.insert(name.to_string(), std::fs::read_to_string(&path)?);
        }
        tracing::info!(dir = %dir.display(), count = views.len(), "Loaded views");
        Ok(Self { views })
    }
}

impl ViewResolver for FileViewResolver {
    fn view(&self, name: &str) -> Option<String> {
        self.views.get(name).cloned()
    }
}

/// Build the resolver described by the configuration.
pub fn create_view_resolver(config: &ViewsConfig) -> io::Result<Arc<dyn ViewResolver>> {
    match &config.dir {
        Some(dir) => Ok(Arc::new(FileViewResolver::load(dir)?)),
        None => Ok(Arc::new(RedirectOnly)),
    }
}

/// Render a destination as a view, or redirect to it.
pub fn view_or_redirect(views: &dyn ViewResolver, destination: &str) -> Response {
    match views.view(destination) {
        Some(html) => Html(html).into_response(),
        None => Redirect::to(destination).into_response(),
    }
}

/// Turn a broker transition into an HTTP response.
pub fn respond(views: &dyn ViewResolver, transition: Transition) -> Response {
    match transition.next {
        Next::Redirect(url) => Redirect::to(&url).into_response(),
        Next::Destination(destination) => view_or_redirect(views, &destination),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{StatusCode, header};
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_file_views_render_by_name() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("login.html"), "<form>login</form>").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let views = FileViewResolver::load(dir.path()).unwrap();
        assert_eq!(views.view("login").as_deref(), Some("<form>login</form>"));
        assert!(views.view("notes").is_none());

        let response = view_or_redirect(&views, "login");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_missing_view_redirects() {
        let response = view_or_redirect(&RedirectOnly, "/unauthorized");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/unauthorized");
    }

    #[test]
    fn test_missing_dir_fails() {
        let config = ViewsConfig {
            dir: Some("/nonexistent/fedauth-views".into()),
        };
        assert!(create_view_resolver(&config).is_err());
    }
}
