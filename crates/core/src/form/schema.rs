use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;

use super::SlotDefinition;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("slot `{0}` is declared more than once")]
    DuplicateSlot(String),
    #[error("slot `{slot}` depends on undeclared slot `{dependency}`")]
    UnknownDependency { slot: String, dependency: String },
}

/// Immutable slot schema for one business line.
///
/// Holds the declaration order plus a reverse-dependency index (slot to its direct
/// dependents) built once, so clearing a slot never has to rescan the whole schema.
#[derive(Clone, Debug)]
pub struct FormSchema {
    definitions: Vec<SlotDefinition>,
    positions: HashMap<String, usize>,
    dependents: HashMap<String, Vec<String>>,
}

impl FormSchema {
    pub fn new(definitions: Vec<SlotDefinition>) -> Result<Self, SchemaError> {
        let mut positions = HashMap::with_capacity(definitions.len());
        for (position, definition) in definitions.iter().enumerate() {
            if positions.insert(definition.name.clone(), position).is_some() {
                return Err(SchemaError::DuplicateSlot(definition.name.clone()));
            }
        }

        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for definition in &definitions {
            for dependency in &definition.dependencies {
                if !positions.contains_key(dependency) {
                    return Err(SchemaError::UnknownDependency {
                        slot: definition.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
                let entry = dependents.entry(dependency.clone()).or_default();
                if !entry.contains(&definition.name) {
                    entry.push(definition.name.clone());
                }
            }
        }

        Ok(Self { definitions, positions, dependents })
    }

    pub fn definitions(&self) -> &[SlotDefinition] {
        &self.definitions
    }

    pub fn get(&self, name: &str) -> Option<&SlotDefinition> {
        self.positions.get(name).map(|position| &self.definitions[*position])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn direct_dependents(&self, name: &str) -> &[String] {
        self.dependents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every slot that depends on `name` directly or transitively, breadth-first.
    /// `name` itself is never part of the result, even inside a cycle.
    pub fn transitive_dependents(&self, name: &str) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::from([name]);
        let mut queue: VecDeque<&str> = VecDeque::from([name]);
        let mut ordered = Vec::new();

        while let Some(current) = queue.pop_front() {
            for dependent in self.direct_dependents(current) {
                if seen.insert(dependent.as_str()) {
                    ordered.push(dependent.clone());
                    queue.push_back(dependent.as_str());
                }
            }
        }

        ordered
    }

    /// First dependency cycle found, as the list of slots along it.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Unvisited,
            Active,
            Done,
        }

        fn visit(
            schema: &FormSchema,
            position: usize,
            marks: &mut [Mark],
            path: &mut Vec<usize>,
        ) -> Option<Vec<String>> {
            marks[position] = Mark::Active;
            path.push(position);
            for dependency in &schema.definitions[position].dependencies {
                let Some(next) = schema.position(dependency) else { continue };
                match marks[next] {
                    Mark::Active => {
                        let start = path.iter().position(|entry| *entry == next).unwrap_or(0);
                        return Some(
                            path[start..]
                                .iter()
                                .map(|entry| schema.definitions[*entry].name.clone())
                                .collect(),
                        );
                    }
                    Mark::Unvisited => {
                        if let Some(cycle) = visit(schema, next, marks, path) {
                            return Some(cycle);
                        }
                    }
                    Mark::Done => {}
                }
            }
            path.pop();
            marks[position] = Mark::Done;
            None
        }

        let mut marks = vec![Mark::Unvisited; self.definitions.len()];
        let mut path = Vec::new();
        for position in 0..self.definitions.len() {
            if marks[position] == Mark::Unvisited {
                if let Some(cycle) = visit(self, position, &mut marks, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }
}
