use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::build::{BuildIdentity, TaskHandle};
use crate::engine::BuildWorkGraph;
use crate::error::CoordinatorError;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Fails if the tasks of `build` reachable from `entry_tasks` depend on each
/// other in a cycle. Edges into other builds are not followed.
///
/// # Time Complexity
///
/// O(V + E) for the search; the diagram is only built once a cycle is found.
pub fn check_for_cycles(
    graph: &dyn BuildWorkGraph,
    build: &BuildIdentity,
    entry_tasks: &[TaskHandle],
) -> Result<(), CoordinatorError> {
    let mut marks = HashMap::new();
    for task in entry_tasks {
        if marks.contains_key(task) {
            continue;
        }
        if let Some(offender) = visit(graph, build, task, &mut marks) {
            return Err(CoordinatorError::CircularDependency {
                diagram: render_cycle(graph, build, &offender),
            });
        }
    }
    Ok(())
}

/// Returns the task closing a back edge, if any.
fn visit(
    graph: &dyn BuildWorkGraph,
    build: &BuildIdentity,
    start: &TaskHandle,
    marks: &mut HashMap<TaskHandle, Mark>,
) -> Option<TaskHandle> {
    marks.insert(start.clone(), Mark::Visiting);
    let mut stack = vec![(start.clone(), graph.dependencies(start).into_iter())];
    while let Some((_, deps)) = stack.last_mut() {
        match deps.next() {
            Some(dep) if dep.build() != build => {}
            Some(dep) => match marks.get(&dep) {
                Some(Mark::Visiting) => return Some(dep),
                Some(Mark::Done) => {}
                None => {
                    marks.insert(dep.clone(), Mark::Visiting);
                    let deps = graph.dependencies(&dep).into_iter();
                    stack.push((dep, deps));
                }
            },
            None => {
                if let Some((task, _)) = stack.pop() {
                    marks.insert(task, Mark::Done);
                }
            }
        }
    }
    None
}

/// Renders the strongly connected component containing `offender` as a
/// dependency tree.
fn render_cycle(graph: &dyn BuildWorkGraph, build: &BuildIdentity, offender: &TaskHandle) -> String {
    let mut tasks: DiGraph<TaskHandle, ()> = DiGraph::new();
    let mut index: HashMap<TaskHandle, NodeIndex> = HashMap::new();
    let start = tasks.add_node(offender.clone());
    index.insert(offender.clone(), start);

    let mut queue = VecDeque::from([offender.clone()]);
    while let Some(task) = queue.pop_front() {
        let from = index[&task];
        for dep in graph.dependencies(&task) {
            if dep.build() != build {
                continue;
            }
            let to = match index.get(&dep) {
                Some(existing) => *existing,
                None => {
                    let added = tasks.add_node(dep.clone());
                    index.insert(dep.clone(), added);
                    queue.push_back(dep);
                    added
                }
            };
            tasks.update_edge(from, to, ());
        }
    }

    let component: HashSet<NodeIndex> = tarjan_scc(&tasks)
        .into_iter()
        .find(|scc| scc.contains(&start))
        .map(|scc| scc.into_iter().collect())
        .unwrap_or_else(|| HashSet::from([start]));

    let root = component
        .iter()
        .copied()
        .min_by(|a, b| tasks[*a].cmp(&tasks[*b]))
        .unwrap_or(start);

    let mut renderer = TreeRenderer {
        tasks: &tasks,
        component: &component,
        seen: HashSet::new(),
        lines: Vec::new(),
        omitted: false,
    };
    renderer.render(root, "", true, true);

    let mut diagram = renderer.lines.join("\n");
    if renderer.omitted {
        diagram.push_str("\n\n(*) - details omitted (listed previously)");
    }
    diagram
}

struct TreeRenderer<'a> {
    tasks: &'a DiGraph<TaskHandle, ()>,
    component: &'a HashSet<NodeIndex>,
    seen: HashSet<NodeIndex>,
    lines: Vec<String>,
    omitted: bool,
}

impl TreeRenderer<'_> {
    fn render(&mut self, node: NodeIndex, prefix: &str, last: bool, root: bool) {
        let repeated = !self.seen.insert(node);
        let label = self.tasks[node].to_string();
        let line = match (root, last) {
            (true, _) => label,
            (false, true) => format!("{prefix}\\--- {label}"),
            (false, false) => format!("{prefix}+--- {label}"),
        };
        if repeated {
            self.lines.push(format!("{line} (*)"));
            self.omitted = true;
            return;
        }
        self.lines.push(line);

        let mut children: Vec<NodeIndex> = self
            .tasks
            .neighbors(node)
            .filter(|child| self.component.contains(child))
            .collect();
        children.sort_by(|a, b| self.tasks[*a].cmp(&self.tasks[*b]));
        children.dedup();

        let child_prefix = if root {
            String::new()
        } else if last {
            format!("{prefix}     ")
        } else {
            format!("{prefix}|    ")
        };
        let count = children.len();
        for (i, child) in children.into_iter().enumerate() {
            self.render(child, &child_prefix, i + 1 == count, false);
        }
    }
}
