//! Loading a whole source file: helper functions plus generators.

use std::rc::Rc;

use atlas_core::{parse_program, FnDef};
use tracing::info;

use crate::compiler::GENERATOR_DECORATOR;
use crate::error::{AtlasError, AtlasResult};
use crate::generator::{FunctionSource, Generator};
use crate::namespace::{Binding, Namespace};
use crate::registry::Registry;

/// The generators and helper functions of one source file.
///
/// Functions decorated with `@generator` become [`Generator`]s; all other
/// functions are visible to them as helpers. Generators of a module see
/// each other by function name.
#[derive(Debug)]
pub struct Module {
    file: String,
    generators: Vec<Generator>,
    helpers: Vec<Rc<FnDef>>,
}

impl Module {
    pub fn load(
        file: impl Into<String>,
        source: &str,
        globals: Namespace,
        registry: &Registry,
    ) -> AtlasResult<Self> {
        let file = file.into();
        let program = parse_program(&file, source)?;

        let mut globals = globals;
        let mut helpers = Vec::new();
        let mut sources = Vec::new();
        for def in program.functions {
            let is_generator = def
                .decorators
                .iter()
                .any(|d| d.base_name() == GENERATOR_DECORATOR);
            if !is_generator {
                let def = Rc::new(def);
                globals.insert(def.name.clone(), Binding::Function(def.clone()));
                helpers.push(def);
                continue;
            }
            let text = source
                .get(def.span.start as usize..def.span.end as usize)
                .ok_or_else(|| {
                    AtlasError::Config(format!(
                        "function `{}` in {} has an invalid source range",
                        def.name, file
                    ))
                })?;
            sources.push(FunctionSource::new(file.clone(), text, def.span.line));
        }

        let generators = sources
            .into_iter()
            .map(|source| {
                Generator::builder_from(source)
                    .registry(registry)
                    .globals(globals.clone())
                    .build()
            })
            .collect::<AtlasResult<Vec<_>>>()?;
        for generator in &generators {
            for other in &generators {
                generator.set_global(other.fn_name(), Binding::Generator(other.downgrade()), false);
            }
        }

        info!(
            file = %file,
            generators = generators.len(),
            helpers = helpers.len(),
            "module_loaded"
        );
        Ok(Self {
            file,
            generators,
            helpers,
        })
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    /// Generator defined by the function `fn_name`.
    pub fn generator(&self, fn_name: &str) -> Option<&Generator> {
        self.generators.iter().find(|g| g.fn_name() == fn_name)
    }

    pub fn generators(&self) -> &[Generator] {
        &self.generators
    }

    pub fn helper(&self, name: &str) -> Option<&FnDef> {
        self.helpers
            .iter()
            .find(|def| def.name == name)
            .map(|def| def.as_ref())
    }
}
