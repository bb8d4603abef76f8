use std::cell::{Cell, RefCell};
use std::rc::Rc;

use pretty_assertions::assert_eq;
use simdrv_state::{
    Controller, ControllerResult, NodeHandle, StateError, StateTree, WatchState,
};
use simdrv_types::{Id, Name};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Seen {
    Add { parent: Id, child: Id, linked: bool },
    Remove { parent: Id, child: Id, linked: bool },
    Write { node: Id, size: usize, offset: usize },
    Added(Id),
    Removed(Id),
}

#[derive(Default)]
struct Recorder {
    tag: &'static str,
    log: Rc<RefCell<Vec<(&'static str, Seen)>>>,
}

impl Recorder {
    fn push(&self, seen: Seen) {
        self.log.borrow_mut().push((self.tag, seen));
    }
}

impl Controller for Recorder {
    fn name(&self) -> &'static str {
        self.tag
    }

    fn on_add_node_child(
        &self,
        tree: &mut StateTree,
        parent: NodeHandle,
        child: NodeHandle,
    ) -> ControllerResult {
        self.push(Seen::Add {
            parent: tree.id(parent)?,
            child: tree.id(child)?,
            linked: tree.parent(child)? == Some(parent),
        });
        Ok(())
    }

    fn on_remove_node_child(
        &self,
        tree: &mut StateTree,
        parent: NodeHandle,
        child: NodeHandle,
    ) -> ControllerResult {
        self.push(Seen::Remove {
            parent: tree.id(parent)?,
            child: tree.id(child)?,
            linked: tree.parent(child)? == Some(parent),
        });
        Ok(())
    }

    fn on_write_node_data(
        &self,
        tree: &mut StateTree,
        node: NodeHandle,
        size: usize,
        offset: usize,
    ) -> ControllerResult {
        self.push(Seen::Write {
            node: tree.id(node)?,
            size,
            offset,
        });
        Ok(())
    }

    fn on_added_controller(&self, tree: &mut StateTree, node: NodeHandle) -> ControllerResult {
        self.push(Seen::Added(tree.id(node)?));
        Ok(())
    }

    fn on_removed_controller(&self, tree: &mut StateTree, node: NodeHandle) -> ControllerResult {
        self.push(Seen::Removed(tree.id(node)?));
        Ok(())
    }
}

fn recorder(tag: &'static str, log: &Rc<RefCell<Vec<(&'static str, Seen)>>>) -> Rc<Recorder> {
    Rc::new(Recorder {
        tag,
        log: log.clone(),
    })
}

const DEVICE: Id = Id::new(Name::Device9, 0);
const VOLUME: Id = Id::new(Name::Volume9, 0);
const DATA: Id = Id::named(Name::Data);

#[test]
fn add_child_fires_after_linking() {
    let log = Rc::default();
    let mut tree = StateTree::new();
    let root = tree.root();
    tree.add_controller(root, recorder("a", &log)).unwrap();

    tree.create_child(root, DEVICE).unwrap();

    assert_eq!(
        *log.borrow(),
        vec![
            ("a", Seen::Added(Id::named(Name::Root))),
            (
                "a",
                Seen::Add {
                    parent: Id::named(Name::Root),
                    child: DEVICE,
                    linked: true
                }
            ),
        ]
    );
}

#[test]
fn detached_children_are_visible_when_the_parent_hears_about_them() {
    let log = Rc::default();
    let mut tree = StateTree::new();
    let root = tree.root();
    let device = tree.create_child(root, DEVICE).unwrap();

    struct Probe(Rc<Cell<Option<u32>>>);
    impl Controller for Probe {
        fn on_add_node_child(
            &self,
            tree: &mut StateTree,
            _parent: NodeHandle,
            child: NodeHandle,
        ) -> ControllerResult {
            self.0
                .set(Some(tree.child_value::<u32>(child, Id::named(Name::Width))?));
            Ok(())
        }
    }
    let width = Rc::new(Cell::new(None));
    tree.add_controller(device, Rc::new(Probe(width.clone())))
        .unwrap();
    tree.add_controller(device, recorder("a", &log)).unwrap();

    let volume = tree.create_node(VOLUME);
    tree.create_value_child(volume, Id::named(Name::Width), 16u32)
        .unwrap();
    tree.add_child(device, volume).unwrap();

    assert_eq!(width.get(), Some(16));
}

#[test]
fn removal_is_announced_while_the_child_is_alive() {
    let log = Rc::default();
    let mut tree = StateTree::new();
    let root = tree.root();
    let device = tree.create_child(root, DEVICE).unwrap();
    let volume = tree.create_child(device, VOLUME).unwrap();
    let data = tree.create_child(volume, DATA).unwrap();

    tree.add_controller(root, recorder("root", &log)).unwrap();
    tree.add_controller(device, recorder("device", &log)).unwrap();
    tree.add_controller(volume, recorder("volume", &log)).unwrap();
    tree.add_controller(data, recorder("data", &log)).unwrap();
    log.borrow_mut().clear();

    tree.remove_child(root, device).unwrap();

    assert_eq!(
        *log.borrow(),
        vec![
            (
                "root",
                Seen::Remove {
                    parent: Id::named(Name::Root),
                    child: DEVICE,
                    linked: true
                }
            ),
            (
                "device",
                Seen::Remove {
                    parent: DEVICE,
                    child: VOLUME,
                    linked: true
                }
            ),
            (
                "volume",
                Seen::Remove {
                    parent: VOLUME,
                    child: DATA,
                    linked: true
                }
            ),
            ("data", Seen::Removed(DATA)),
            ("volume", Seen::Removed(VOLUME)),
            ("device", Seen::Removed(DEVICE)),
        ]
    );
    assert_eq!(tree.len(), 1);
}

#[test]
fn controllers_are_notified_in_attachment_order() {
    let log = Rc::default();
    let mut tree = StateTree::new();
    let node = tree.create_node_with_data(DATA, vec![0u8; 16]);
    tree.add_controller(node, recorder("first", &log)).unwrap();
    tree.add_controller(node, recorder("second", &log)).unwrap();
    log.borrow_mut().clear();

    tree.write_data(node, &[1, 2, 3], 5).unwrap();

    let write = Seen::Write {
        node: DATA,
        size: 3,
        offset: 5,
    };
    assert_eq!(
        *log.borrow(),
        vec![("first", write.clone()), ("second", write)]
    );
}

#[test]
fn resizing_is_silent_and_mapping_fires_on_unmap() {
    let log = Rc::default();
    let mut tree = StateTree::new();
    let node = tree.create_node(DATA);
    tree.add_controller(node, recorder("a", &log)).unwrap();
    log.borrow_mut().clear();

    tree.set_data_size(node, 32).unwrap();
    tree.resize_data(node, 64).unwrap();
    let _ = tree.data(node).unwrap();
    assert!(log.borrow().is_empty());

    let mut map = tree.map_data_write(node, 8, 16).unwrap();
    map.fill(0xAB);
    map.unmap().unwrap();
    {
        let _map = tree.map_data_write(node, 0, 4).unwrap();
    }

    assert_eq!(
        *log.borrow(),
        vec![
            (
                "a",
                Seen::Write {
                    node: DATA,
                    size: 16,
                    offset: 8
                }
            ),
            (
                "a",
                Seen::Write {
                    node: DATA,
                    size: 4,
                    offset: 0
                }
            ),
        ]
    );
    assert_eq!(&tree.data(node).unwrap()[8..24], &[0xAB; 16]);
}

#[test]
fn controller_attachment_is_checked() {
    let log = Rc::default();
    let mut tree = StateTree::new();
    let node = tree.create_node(DATA);
    let a = recorder("a", &log);

    assert_eq!(tree.watch_state(node).unwrap(), WatchState::Unattached);
    tree.add_controller(node, a.clone()).unwrap();
    assert_eq!(tree.watch_state(node).unwrap(), WatchState::Watched(1));
    assert!(tree.has_controller(node, &*a).unwrap());

    let err = tree.add_controller(node, a.clone()).unwrap_err();
    assert_eq!(err.to_string(), "add_controller: controller a already attached to data[0]");

    tree.remove_controller(node, &*a).unwrap();
    assert!(matches!(
        tree.remove_controller(node, &*a),
        Err(StateError::ControllerNotFound { .. })
    ));
    assert_eq!(
        *log.borrow(),
        vec![("a", Seen::Added(DATA)), ("a", Seen::Removed(DATA))]
    );
}

struct Failing;

impl Controller for Failing {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn on_write_node_data(
        &self,
        _tree: &mut StateTree,
        _node: NodeHandle,
        _size: usize,
        _offset: usize,
    ) -> ControllerResult {
        Err("device lost".into())
    }
}

#[test]
fn callback_errors_abort_dispatch() {
    let log = Rc::default();
    let mut tree = StateTree::new();
    let node = tree.create_node_with_data(DATA, vec![0u8; 4]);
    tree.add_controller(node, Rc::new(Failing)).unwrap();
    tree.add_controller(node, recorder("after", &log)).unwrap();
    log.borrow_mut().clear();

    let err = tree.write_data(node, &[1], 0).unwrap_err();
    assert!(matches!(
        err,
        StateError::Controller {
            controller: "failing",
            event: "write_node_data",
            ..
        }
    ));
    assert_eq!(
        err.to_string(),
        "write_node_data: controller failing failed: device lost"
    );
    // Data is written before anyone is notified.
    assert_eq!(tree.data(node).unwrap(), &[1, 0, 0, 0]);
    assert!(log.borrow().is_empty());

    {
        let _map = tree.map_data_write(node, 0, 1).unwrap();
    }
    assert!(matches!(
        tree.take_deferred_error(),
        Some(StateError::Controller { .. })
    ));
    assert!(tree.take_deferred_error().is_none());
}

/// Refuses to be attached anywhere.
struct Refusing;

impl Controller for Refusing {
    fn name(&self) -> &'static str {
        "refusing"
    }

    fn on_added_controller(&self, _tree: &mut StateTree, _node: NodeHandle) -> ControllerResult {
        Err("not this node".into())
    }
}

/// Refuses every child added under the nodes it watches.
struct Childless;

impl Controller for Childless {
    fn name(&self) -> &'static str {
        "childless"
    }

    fn on_add_node_child(
        &self,
        _tree: &mut StateTree,
        _parent: NodeHandle,
        _child: NodeHandle,
    ) -> ControllerResult {
        Err("no children here".into())
    }
}

#[test]
fn refused_controller_is_not_left_attached() {
    let mut tree = StateTree::new();
    let node = tree.create_node(DATA);
    let refusing = Rc::new(Refusing);

    let err = tree.add_controller(node, refusing.clone()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "added_controller: controller refusing failed: not this node"
    );
    assert!(!tree.has_controller(node, &*refusing).unwrap());
    assert_eq!(tree.watch_state(node).unwrap(), WatchState::Unattached);

    // A retry fails the same way instead of reporting a duplicate.
    assert!(matches!(
        tree.add_controller(node, refusing),
        Err(StateError::Controller {
            controller: "refusing",
            ..
        })
    ));
}

#[test]
fn refused_child_is_destroyed() {
    let log = Rc::default();
    let mut tree = StateTree::new();
    let root = tree.root();
    let device = tree.create_child(root, DEVICE).unwrap();
    let childless = Rc::new(Childless);
    tree.add_controller(device, recorder("before", &log)).unwrap();
    tree.add_controller(device, childless.clone()).unwrap();
    log.borrow_mut().clear();
    let live = tree.len();

    let err = tree.create_child(device, VOLUME).unwrap_err();
    assert!(matches!(
        err,
        StateError::Controller {
            controller: "childless",
            event: "add_node_child",
            ..
        }
    ));
    assert_eq!(tree.len(), live);
    assert!(tree.children(device).unwrap().is_empty());
    assert_eq!(
        *log.borrow(),
        vec![(
            "before",
            Seen::Add {
                parent: DEVICE,
                child: VOLUME,
                linked: true
            }
        )]
    );

    tree.remove_controller(device, &*childless).unwrap();
    let volume = tree.create_child(device, VOLUME).unwrap();
    assert_eq!(tree.children(device).unwrap(), vec![volume]);
}
