//! Subject and body rendering.
//!
//! Templates use Jinja syntax. Undefined variables render as an empty string
//! rather than failing, so a template referencing a field the context lacks
//! still produces a message.
//!
//! HTML parts escape every context value. Rendered campaign content is the
//! only value inserted as markup. Subjects and text parts are never escaped.

use std::collections::BTreeMap;

use herald_common::{EmailTemplate, HeraldError, NewsletterCampaign};
use minijinja::{AutoEscape, Environment, UndefinedBehavior, Value};

/// Key-value context handed to templates.
pub type TemplateContext = BTreeMap<String, String>;

/// Layout wrapping campaign content when no registered template is named.
const NEWSLETTER_LAYOUT: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{{ campaign_title }}</title></head>
<body>
<p>Hello {{ subscriber_name }},</p>
{{ content }}
<hr>
<p style="font-size: small">Sent on {{ current_date }}. <a href="{{ unsubscribe_url }}">Unsubscribe</a></p>
</body>
</html>"#;

const NEWSLETTER_TEXT: &str = "Hello {{ subscriber_name }},

{{ campaign_title }}

Sent on {{ current_date }}. To unsubscribe visit {{ unsubscribe_url }}";

/// A fully rendered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
}

#[derive(Debug)]
pub struct TemplateRenderer {
    html: Environment<'static>,
    plain: Environment<'static>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Lenient);
    env
}

fn template_error(err: &minijinja::Error) -> HeraldError {
    HeraldError::template(format!("template render error: {err}"))
        .with_detail("kind", format!("{:?}", err.kind()))
}

impl TemplateRenderer {
    #[must_use]
    pub fn new() -> Self {
        let mut html = environment();
        html.set_auto_escape_callback(|_| AutoEscape::Html);

        let mut plain = environment();
        plain.set_auto_escape_callback(|_| AutoEscape::None);

        Self { html, plain }
    }

    /// Render a single template source as plain text.
    ///
    /// # Errors
    ///
    /// A `Template` error if the source does not compile or rendering fails.
    pub fn render_str(&self, source: &str, context: &TemplateContext) -> Result<String, HeraldError> {
        self.plain
            .render_str(source, context)
            .map_err(|err| template_error(&err))
    }

    /// Render a single template source as HTML, escaping every context
    /// value. `content`, when given, is exposed unescaped as `content`.
    ///
    /// # Errors
    ///
    /// A `Template` error if the source does not compile or rendering fails.
    pub fn render_html(
        &self,
        source: &str,
        context: &TemplateContext,
        content: Option<&str>,
    ) -> Result<String, HeraldError> {
        let mut values: BTreeMap<&str, Value> = context
            .iter()
            .map(|(key, value)| (key.as_str(), Value::from(value.as_str())))
            .collect();

        if let Some(content) = content {
            values.insert("content", Value::from_safe_string(content.to_string()));
        }

        self.html
            .render_str(source, values)
            .map_err(|err| template_error(&err))
    }

    /// Render every part of a registered template.
    ///
    /// # Errors
    ///
    /// A `Template` error if any part fails to render.
    pub fn render(
        &self,
        template: &EmailTemplate,
        context: &TemplateContext,
    ) -> Result<RenderedEmail, HeraldError> {
        self.render_with_content(template, context, None)
    }

    fn render_with_content(
        &self,
        template: &EmailTemplate,
        context: &TemplateContext,
        content: Option<&str>,
    ) -> Result<RenderedEmail, HeraldError> {
        Ok(RenderedEmail {
            subject: self.render_subject(&template.subject, context)?,
            html: self.render_html(&template.html, context, content)?,
            text: template
                .text
                .as_deref()
                .map(|text| self.render_str(text, context))
                .transpose()?,
        })
    }

    /// Render a campaign for one subscriber.
    ///
    /// The campaign content is rendered first and exposed to the layout as
    /// `content`. The layout is `layout` when given, the built-in newsletter
    /// layout otherwise.
    ///
    /// # Errors
    ///
    /// A `Template` error if the content or the layout fails to render.
    pub fn render_campaign(
        &self,
        campaign: &NewsletterCampaign,
        layout: Option<&EmailTemplate>,
        context: &TemplateContext,
    ) -> Result<RenderedEmail, HeraldError> {
        let content = self.render_html(&campaign.content, context, None)?;
        let mut context = context.clone();
        context.insert(String::from("content"), content.clone());

        match layout {
            Some(template) => {
                let mut rendered = self.render_with_content(template, &context, Some(&content))?;
                rendered.subject = self.render_subject(&campaign.subject, &context)?;
                Ok(rendered)
            }
            None => Ok(RenderedEmail {
                subject: self.render_subject(&campaign.subject, &context)?,
                html: self.render_html(NEWSLETTER_LAYOUT, &context, Some(&content))?,
                text: Some(self.render_str(NEWSLETTER_TEXT, &context)?),
            }),
        }
    }

    /// Subjects are single line.
    fn render_subject(&self, source: &str, context: &TemplateContext) -> Result<String, HeraldError> {
        Ok(self
            .render_str(source, context)?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" "))
    }
}
