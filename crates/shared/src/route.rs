use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{domain::DocumentId, error::CoreError};

/// View identifier without its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    Auth,
    Dashboard,
    Upload,
    Analysis,
    Chat,
    Profile,
}

impl View {
    pub fn as_str(self) -> &'static str {
        match self {
            View::Auth => "auth",
            View::Dashboard => "dashboard",
            View::Upload => "upload",
            View::Analysis => "analysis",
            View::Chat => "chat",
            View::Profile => "profile",
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for View {
    type Err = CoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auth" | "login" => Ok(View::Auth),
            "dashboard" | "home" => Ok(View::Dashboard),
            "upload" => Ok(View::Upload),
            "analysis" => Ok(View::Analysis),
            "chat" => Ok(View::Chat),
            "profile" => Ok(View::Profile),
            other => Err(CoreError::Validation(format!("unknown view '{other}'"))),
        }
    }
}

/// Active view plus its parameters. Only the document views carry an id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum Route {
    Auth,
    Dashboard,
    Upload,
    Analysis { document_id: DocumentId },
    Chat { document_id: DocumentId },
    Profile,
}

impl Route {
    pub fn new(view: View, document_id: Option<DocumentId>) -> Result<Self, CoreError> {
        let route = match (view, document_id) {
            (View::Analysis, Some(document_id)) => Route::Analysis { document_id },
            (View::Chat, Some(document_id)) => Route::Chat { document_id },
            (View::Analysis | View::Chat, None) => {
                return Err(CoreError::Validation(format!(
                    "view '{view}' requires a document id"
                )))
            }
            (View::Auth, _) => Route::Auth,
            (View::Dashboard, _) => Route::Dashboard,
            (View::Upload, _) => Route::Upload,
            (View::Profile, _) => Route::Profile,
        };
        Ok(route)
    }

    pub fn view(&self) -> View {
        match self {
            Route::Auth => View::Auth,
            Route::Dashboard => View::Dashboard,
            Route::Upload => View::Upload,
            Route::Analysis { .. } => View::Analysis,
            Route::Chat { .. } => View::Chat,
            Route::Profile => View::Profile,
        }
    }

    pub fn document_id(&self) -> Option<&DocumentId> {
        match self {
            Route::Analysis { document_id } | Route::Chat { document_id } => Some(document_id),
            _ => None,
        }
    }

    pub fn requires_session(&self) -> bool {
        !matches!(self, Route::Auth)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.document_id() {
            Some(document_id) => write!(f, "{}/{document_id}", self.view()),
            None => write!(f, "{}", self.view()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_views_require_an_id() {
        assert!(Route::new(View::Chat, None).is_err());
        let route = Route::new(View::Chat, Some(DocumentId::from("42"))).expect("route");
        assert_eq!(route.document_id(), Some(&DocumentId::from("42")));
        assert_eq!(route.to_string(), "chat/42");
    }

    #[test]
    fn plain_views_drop_stray_ids() {
        let route = Route::new(View::Profile, Some(DocumentId::from("42"))).expect("route");
        assert_eq!(route, Route::Profile);
        assert_eq!(route.document_id(), None);
    }

    #[test]
    fn parses_view_names() {
        assert_eq!("Dashboard".parse::<View>().expect("view"), View::Dashboard);
        assert_eq!("login".parse::<View>().expect("view"), View::Auth);
        assert!("settings".parse::<View>().is_err());
    }

    #[test]
    fn serializes_with_view_tag() {
        let value = serde_json::to_value(Route::Analysis {
            document_id: DocumentId::from("7"),
        })
        .expect("serialize");
        assert_eq!(value["view"], "analysis");
        assert_eq!(value["document_id"], "7");
    }
}
