//! Message rendering: `{{token}}` substitution and the HTML digest body.
//!
//! Supported tokens: `{{count}}`, `{{date}}`, `{{name}}`, `{{app}}`,
//! `{{immersion}}`. Unknown or missing tokens render as an empty string.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;

use imersao_core::{NotificationTemplate, RuleKey};

/// Token values for one rendered message.
#[derive(Debug, Clone, Default)]
pub struct RenderVars {
    values: HashMap<String, String>,
}

impl RenderVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Substitutes `{{token}}` occurrences. Never fails; an unclosed `{{` is kept as text.
pub fn render(template: &str, vars: &RenderVars) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => {
                let key = after[..close].trim();
                out.push_str(vars.get(key).unwrap_or(""));
                rest = &after[close + 2..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// dd/mm/yyyy, as the console displays dates.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// One row of a digest email.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigestLine {
    pub title: String,
    pub immersion: String,
    pub due_date: Option<NaiveDate>,
    pub detail: Option<String>,
}

/// Rendered subject and HTML body.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMessage {
    pub subject: String,
    pub html: String,
}

pub fn render_message(
    template: &NotificationTemplate,
    vars: &RenderVars,
    lines: &[DigestLine],
) -> RenderedMessage {
    let subject = render(&template.subject, vars);
    let intro = render(&template.intro, vars);
    let footer = render(&template.footer, vars);

    let mut html = String::new();
    html.push_str("<div style=\"font-family:Arial,sans-serif;font-size:14px\">");
    html.push_str(&format!("<p>{}</p>", escape_html(&intro)));
    if !lines.is_empty() {
        html.push_str("<ul>");
        for line in lines {
            html.push_str("<li><strong>");
            html.push_str(&escape_html(&line.title));
            html.push_str("</strong>");
            if !line.immersion.is_empty() {
                html.push_str(&format!(" · {}", escape_html(&line.immersion)));
            }
            if let Some(due) = line.due_date {
                html.push_str(&format!(" · {}", format_date(due)));
            }
            if let Some(detail) = &line.detail {
                html.push_str(&format!(" · {}", escape_html(detail)));
            }
            html.push_str("</li>");
        }
        html.push_str("</ul>");
    }
    if !footer.is_empty() {
        html.push_str(&format!(
            "<p style=\"color:#666;font-size:12px\">{}</p>",
            escape_html(&footer)
        ));
    }
    html.push_str("</div>");

    RenderedMessage { subject, html }
}

/// Built-in copy used when a rule has no stored template.
pub fn default_template(rule_key: RuleKey) -> NotificationTemplate {
    let (subject, intro, footer) = match rule_key {
        RuleKey::ImmersionCreated => (
            "[{{app}}] Nova imersão: {{immersion}}",
            "Olá {{name}}, a imersão {{immersion}} foi criada e você faz parte da equipe.",
            "Enviado automaticamente por {{app}} em {{date}}.",
        ),
        RuleKey::TaskOverdueDaily => (
            "[{{app}}] {{count}} tarefa(s) atrasada(s)",
            "Olá {{name}}, você tem {{count}} tarefa(s) com prazo vencido em {{date}}:",
            "Atualize o status no {{app}} assim que concluir.",
        ),
        RuleKey::TaskDueSoonWeekly => (
            "[{{app}}] {{count}} tarefa(s) para os próximos 7 dias",
            "Olá {{name}}, estas tarefas vencem nos próximos 7 dias (a partir de {{date}}):",
            "Resumo semanal enviado por {{app}}.",
        ),
        RuleKey::ImmersionRiskDaily => (
            "[{{app}}] {{count}} imersão(ões) em risco",
            "Olá {{name}}, as imersões abaixo acumulam tarefas atrasadas ({{immersion}}):",
            "Revise as pendências com a equipe. {{app}} · {{date}}",
        ),
    };
    NotificationTemplate {
        rule_key,
        subject: subject.into(),
        intro: intro.into(),
        footer: footer.into(),
    }
}
