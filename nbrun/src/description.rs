//! Human-readable descriptions of an object.

use handlebars::{no_escape, Handlebars};
use nbrun_common::prelude::*;
use serde::Serialize;

/// Render the specified textual description, filling in the supplied values
/// using [Handlebars][].
///
/// [Handlebars]: https://handlebarsjs.com/
pub fn render_description<T: Serialize>(template: &str, params: &T) -> Result<String> {
    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(true);
    // We emit plain text, not HTML.
    handlebars.register_escape_fn(no_escape);
    handlebars
        .render_template(template, &params)
        .map_err(|err| Error::Other(err.into()))
}
