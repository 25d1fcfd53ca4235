#![no_main]

//! Fuzz target for doc-comment tag parsing
//!
//! Tag parsing must never panic, whatever the comment looks like.

use arbitrary::Arbitrary;
use dependency_weaver::tags::{parse_aspect_arguments, parse_method_tags, parse_property_tags, parse_type_tags};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Doc {
    Raw(String),
    /// A comment assembled from known tag names and arbitrary operands
    Tagged(Vec<(TagName, String)>),
}

#[derive(Debug, Arbitrary)]
enum TagName {
    Singleton,
    ImplementedBy,
    ProvidedBy,
    Named,
    Inject,
    Var,
    Before,
    Intercept,
    After,
    AllowedContext,
    Generator,
}

impl TagName {
    fn as_str(&self) -> &'static str {
        match self {
            TagName::Singleton => "@singleton",
            TagName::ImplementedBy => "@implementedBy",
            TagName::ProvidedBy => "@providedBy",
            TagName::Named => "@named",
            TagName::Inject => "@inject",
            TagName::Var => "@var",
            TagName::Before => "@before",
            TagName::Intercept => "@intercept",
            TagName::After => "@after",
            TagName::AllowedContext => "@allowedContext",
            TagName::Generator => "@generator",
        }
    }
}

fuzz_target!(|doc: Doc| {
    let text = match doc {
        Doc::Raw(text) => text,
        Doc::Tagged(tags) => {
            let mut text = String::from("/**\n");
            for (name, operands) in &tags {
                text.push_str(" * ");
                text.push_str(name.as_str());
                text.push(' ');
                text.push_str(operands);
                text.push('\n');
            }
            text.push_str(" */");
            text
        }
    };

    let _ = parse_type_tags(&text);
    let _ = parse_method_tags(&text);
    let _ = parse_property_tags(&text);
    let _ = parse_aspect_arguments(&text);
});
