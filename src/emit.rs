//! Rust source rendering for compiled units
//!
//! [`render`] turns a [`CompiledUnits`] set into one module per unit
//! (`<type>_factory.rs`), one per injection proxy (`<type>_proxy.rs`) and a
//! `mod.rs` dispatching every compiled request. The generated modules call
//! into [`CompiledContainer`](crate::CompiledContainer) for singleton caching,
//! aspect weaving and host code, so they run with the same semantics as the
//! in-memory container. Output is deterministic and every file is checked to
//! parse as Rust before it is returned.
//!
//! [`render_module`] produces the same code as a single file of inline
//! modules, for build scripts that `include!` it from `OUT_DIR`.

use crate::unit::{CompiledUnits, FactoryUnit, InjectionProxy, ParamSource, Target};
use crate::value::{Args, Argument, Value};
use crate::{CompilationError, DiError, Result};
use proc_macro2::{Literal, TokenStream};
use quote::{format_ident, quote};
use std::io::Write;
use std::path::{Path, PathBuf};

#[cfg(feature = "logging")]
use tracing::{debug, info};

/// Crate path used by generated code
const RUNTIME: &str = "dependency_weaver";

/// One rendered source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    /// Path relative to the output directory
    pub path: PathBuf,
    pub contents: String,
}

/// Render every emitted unit, its proxy and the dispatch module.
pub fn render(units: &CompiledUnits) -> Result<Vec<GeneratedFile>> {
    let mut files = Vec::new();
    for unit in units.units.values().filter(|u| !u.generator_ignore) {
        files.push(file(
            &unit.type_name,
            format!("{}_factory.rs", unit.module),
            &format!("Factory unit for `{}`.", unit.type_name),
            factory(units, unit)?,
        )?);
        if let Some(proxy) = &unit.proxy {
            files.push(file(
                &unit.type_name,
                format!("{}_proxy.rs", unit.module),
                &format!("`{}` for `{}`.", proxy.name, unit.type_name),
                proxy_module(units, proxy)?,
            )?);
        }
    }
    files.push(file(
        "mod",
        "mod.rs".to_string(),
        "Compiled binding graph.",
        dispatch(units, module_declarations(units))?,
    )?);

    #[cfg(feature = "logging")]
    debug!(
        target: "dependency_weaver",
        files = files.len(),
        "Rendered generated sources"
    );

    Ok(files)
}

/// Render and write every file under `dir`, replacing each one atomically.
pub fn write_all(units: &CompiledUnits, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir).map_err(|e| DiError::io(dir, e))?;

    let mut written = Vec::new();
    for generated in render(units)? {
        let path = dir.join(&generated.path);
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| DiError::io(dir, e))?;
        tmp.write_all(generated.contents.as_bytes())
            .map_err(|e| DiError::io(&path, e))?;
        tmp.persist(&path).map_err(|e| DiError::io(&path, e.error))?;
        written.push(path);
    }

    #[cfg(feature = "logging")]
    info!(
        target: "dependency_weaver",
        dir = %dir.display(),
        files = written.len(),
        "Wrote generated sources"
    );

    Ok(written)
}

/// Render the whole graph as one file of inline modules.
///
/// The output holds only items, so it can be pulled in with
/// `include!(concat!(env!("OUT_DIR"), "/..."))`.
pub fn render_module(units: &CompiledUnits) -> Result<String> {
    let mut modules = Vec::new();
    for unit in units.units.values().filter(|u| !u.generator_ignore) {
        let factory_mod = format_ident!("{}_factory", unit.module);
        let body = factory(units, unit)?;
        modules.push(quote!(pub mod #factory_mod { #body }));
        if let Some(proxy) = &unit.proxy {
            let proxy_mod = format_ident!("{}_proxy", unit.module);
            let body = proxy_module(units, proxy)?;
            modules.push(quote!(pub mod #proxy_mod { #body }));
        }
    }
    let body = dispatch(units, modules)?.to_string();
    syn::parse_file(&body).map_err(|e| CompilationError::InvalidOutput {
        type_name: "mod".to_string(),
        reason: e.to_string(),
    })?;
    Ok(format!("// Compiled binding graph.\n// Generated by dependency-weaver. Do not edit.\n\n{body}\n"))
}

/// Write [`render_module`] output to `path`, replacing it atomically.
pub fn write_module(units: &CompiledUnits, path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let source = render_module(units)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| DiError::io(dir, e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| DiError::io(dir, e))?;
    tmp.write_all(source.as_bytes())
        .map_err(|e| DiError::io(path, e))?;
    tmp.persist(path).map_err(|e| DiError::io(path, e.error))?;

    #[cfg(feature = "logging")]
    debug!(
        target: "dependency_weaver",
        path = %path.display(),
        "Wrote generated module"
    );

    Ok(path.to_path_buf())
}

fn file(type_name: &str, path: String, doc: &str, tokens: TokenStream) -> Result<GeneratedFile> {
    let body = tokens.to_string();
    syn::parse_file(&body).map_err(|e| CompilationError::InvalidOutput {
        type_name: type_name.to_string(),
        reason: e.to_string(),
    })?;
    Ok(GeneratedFile {
        path: PathBuf::from(path),
        contents: format!("//! {doc}\n//!\n//! Generated by dependency-weaver. Do not edit.\n\n{body}\n"),
    })
}

fn runtime() -> TokenStream {
    let krate = format_ident!("{}", RUNTIME);
    quote!(#krate)
}

fn factory(units: &CompiledUnits, unit: &FactoryUnit) -> Result<TokenStream> {
    let rt = runtime();
    let type_name = &unit.type_name;
    let constructor = &unit.constructor;
    let depends_on = unit.depends_on.iter();

    let mut params = Vec::with_capacity(unit.params.len());
    for plan in &unit.params {
        let name = &plan.name;
        let fallback = match &plan.source {
            ParamSource::Literal(v) | ParamSource::Default(v) => value(type_name, v)?,
            ParamSource::Request(t) | ParamSource::Dependency(t) => {
                let t = target(units, t, quote!(&Args::new()), quote!(super))?;
                quote!(Value::Object(#t?))
            }
            ParamSource::Required => {
                quote!(return Err(#rt::missing_argument(TYPE_NAME, CONSTRUCTOR, #name)))
            }
        };
        params.push(quote! {
            let value = match ctx.explicit(args, #name)? {
                Some(value) => value,
                None => #fallback,
            };
            arguments.insert(#name, value);
        });
    }

    let inject = match &unit.proxy {
        Some(_) => {
            let proxy = format_ident!("{}_proxy", unit.module);
            quote!(|object| super::#proxy::inject(ctx, object))
        }
        None => quote!(|_| Ok(())),
    };
    let (arguments, args) = if params.is_empty() {
        (quote!(let arguments = Arguments::new();), format_ident!("_args"))
    } else {
        (quote!(let mut arguments = Arguments::new();), format_ident!("args"))
    };

    Ok(quote! {
        #[allow(unused_imports)]
        use #rt::{Args, Argument, Arguments, CompiledContainer, Creation, ObjectRef, Result, Value};

        pub const TYPE_NAME: &str = #type_name;
        pub const CONSTRUCTOR: &str = #constructor;
        pub const DEPENDS_ON: &[&str] = &[#(#depends_on),*];

        pub fn get_instance(
            ctx: &CompiledContainer,
            qualifier: Option<&str>,
            singleton: bool,
            args: &Args,
        ) -> Result<ObjectRef> {
            ctx.singleton(TYPE_NAME, qualifier, singleton, args, |args| build(ctx, args))
        }

        fn build(ctx: &CompiledContainer, #args: &Args) -> Result<Creation> {
            #arguments
            #(#params)*
            ctx.construct(TYPE_NAME, arguments, #inject)
        }
    })
}

fn proxy_module(units: &CompiledUnits, proxy: &InjectionProxy) -> Result<TokenStream> {
    let rt = runtime();
    let name = &proxy.name;
    let target_type = &proxy.target_type;
    let mut assignments = Vec::with_capacity(proxy.properties.len());
    for property in &proxy.properties {
        let field = &property.name;
        let t = target(units, &property.target, quote!(&Args::new()), quote!(super))?;
        assignments.push(quote!(object.set(#field, #t?);));
    }

    Ok(quote! {
        #[allow(unused_imports)]
        use #rt::{Args, Argument, CompiledContainer, ObjectRef, Result, Value};

        pub const PROXY_NAME: &str = #name;
        pub const TARGET_TYPE: &str = #target_type;

        pub fn inject(ctx: &CompiledContainer, object: &ObjectRef) -> Result<()> {
            #(#assignments)*
            Ok(())
        }
    })
}

fn module_declarations(units: &CompiledUnits) -> Vec<TokenStream> {
    let mut modules = Vec::new();
    for unit in units.units.values().filter(|u| !u.generator_ignore) {
        let factory = format_ident!("{}_factory", unit.module);
        modules.push(quote!(pub mod #factory;));
        if unit.proxy.is_some() {
            let proxy = format_ident!("{}_proxy", unit.module);
            modules.push(quote!(pub mod #proxy;));
        }
    }
    modules
}

/// Dispatch over every compiled request. `modules` are either `mod`
/// declarations or inline module bodies.
fn dispatch(units: &CompiledUnits, modules: Vec<TokenStream>) -> Result<TokenStream> {
    let rt = runtime();
    let names = units.units.keys();

    let mut arms = Vec::with_capacity(units.entries.len());
    for ((type_name, qualifier), entry) in &units.entries {
        let q = qualifier_tokens(qualifier.as_deref());
        let t = target(units, entry, quote!(args), quote!(self))?;
        arms.push(quote!((#type_name, #q) => #t,));
    }
    let ctx = match units.entries.is_empty() {
        true => format_ident!("_ctx"),
        false => format_ident!("ctx"),
    };
    let args = match units
        .entries
        .values()
        .any(|t| matches!(t, Target::Provided { .. } | Target::Unit { .. }))
    {
        true => format_ident!("args"),
        false => format_ident!("_args"),
    };

    Ok(quote! {
        #[allow(unused_imports)]
        use #rt::{Args, Argument, CompiledContainer, DiError, ObjectRef, Result, Value};

        #(#modules)*

        pub const UNITS: &[&str] = &[#(#names),*];

        pub fn get_instance(
            #ctx: &CompiledContainer,
            type_name: &str,
            qualifier: Option<&str>,
            #args: &Args,
        ) -> Result<ObjectRef> {
            match (type_name, qualifier) {
                #(#arms)*
                _ => Err(DiError::NotCompiled { type_name: type_name.to_string() }),
            }
        }
    })
}

/// Expression of type `Result<ObjectRef>` realizing `t`.
fn target(
    units: &CompiledUnits,
    t: &Target,
    args: TokenStream,
    parent: TokenStream,
) -> Result<TokenStream> {
    Ok(match t {
        Target::Engine => quote!(Ok(ctx.handle())),
        Target::Instance { type_name, .. } => quote!(ctx.bound_instance(#type_name)),
        Target::Provided {
            for_type,
            qualifier,
            singleton,
            provider,
            params,
        } => {
            let q = qualifier_tokens(qualifier.as_deref());
            let params_expr = args_tokens(for_type, params)?;
            let provider = target(units, provider, quote!(&params), parent)?;
            quote!(ctx.provide(#for_type, #q, #singleton, #args, || {
                let params = #params_expr;
                #provider
            }))
        }
        Target::Unit {
            type_name,
            qualifier,
            singleton,
        } => {
            let q = qualifier_tokens(qualifier.as_deref());
            match units.unit(type_name) {
                Some(unit) if !unit.generator_ignore => {
                    let factory = format_ident!("{}_factory", unit.module);
                    quote!(#parent::#factory::get_instance(ctx, #q, #singleton, #args))
                }
                _ => quote!(ctx.unit_instance(#type_name, #q, #singleton, #args)),
            }
        }
    })
}

fn qualifier_tokens(qualifier: Option<&str>) -> TokenStream {
    match qualifier {
        Some(q) => quote!(Some(#q)),
        None => quote!(None),
    }
}

fn args_tokens(owner: &str, args: &Args) -> Result<TokenStream> {
    let mut inserts = Vec::with_capacity(args.len());
    for (name, argument) in args.iter() {
        let argument = match argument {
            Argument::Value(v) => {
                let v = value(owner, v)?;
                quote!(Argument::Value(#v))
            }
            Argument::Bind {
                type_name,
                qualifier,
            } => {
                let q = match qualifier {
                    Some(q) => quote!(Some(#q.to_string())),
                    None => quote!(None),
                };
                quote!(Argument::Bind { type_name: #type_name.to_string(), qualifier: #q })
            }
        };
        inserts.push(quote!(params.insert(#name, #argument);));
    }
    Ok(if inserts.is_empty() {
        quote!(Args::new())
    } else {
        quote!({
            let mut params = Args::new();
            #(#inserts)*
            params
        })
    })
}

/// Expression of type `Value` for a literal.
fn value(owner: &str, v: &Value) -> Result<TokenStream> {
    Ok(match v {
        Value::Null => quote!(Value::Null),
        Value::Bool(b) => quote!(Value::Bool(#b)),
        Value::Int(i) => {
            let lit = Literal::u64_unsuffixed(i.unsigned_abs());
            if *i < 0 {
                quote!(Value::Int(-#lit))
            } else {
                quote!(Value::Int(#lit))
            }
        }
        Value::Float(x) if x.is_nan() => quote!(Value::Float(f64::NAN)),
        Value::Float(x) if x.is_infinite() && *x > 0.0 => quote!(Value::Float(f64::INFINITY)),
        Value::Float(x) if x.is_infinite() => quote!(Value::Float(f64::NEG_INFINITY)),
        Value::Float(x) => {
            let lit = Literal::f64_suffixed(x.abs());
            if x.is_sign_negative() {
                quote!(Value::Float(-#lit))
            } else {
                quote!(Value::Float(#lit))
            }
        }
        Value::Str(s) => quote!(Value::Str(#s.to_string())),
        Value::List(items) => {
            let items = items
                .iter()
                .map(|item| value(owner, item))
                .collect::<Result<Vec<_>>>()?;
            quote!(Value::List(vec![#(#items),*]))
        }
        Value::Map(map) => {
            let keys = map.keys();
            let values = map
                .values()
                .map(|item| value(owner, item))
                .collect::<Result<Vec<_>>>()?;
            quote!(Value::Map([#((#keys.to_string(), #values)),*].into_iter().collect()))
        }
        Value::Object(o) => {
            return Err(CompilationError::InvalidOutput {
                type_name: owner.to_string(),
                reason: format!("object of class {} cannot be written as a literal", o.class()),
            }
            .into());
        }
    })
}
