use std::cell::RefCell;
use std::rc::Rc;

use otm::error::{CResult, Error};
use otm::object::{EntityKind, ObjectRef};
use otm::oid::{self, Oid};
use otm::txn::ObjectStore;

struct Counter {
    hits: u32,
}

#[derive(Default)]
struct CounterKind;

impl EntityKind for CounterKind {
    fn type_name(&self) -> &'static str {
        "Counter"
    }
    fn client_type_version(&self) -> u32 {
        1
    }
    fn create(&self) -> ObjectRef {
        Rc::new(RefCell::new(Counter { hits: 0 }))
    }
    fn save(&self, object: &ObjectRef, out: &mut Vec<u8>) -> CResult<()> {
        let hits = object.borrow().downcast_ref::<Counter>().unwrap().hits;
        out.extend(oid::encode(Oid(u64::from(hits))));
        Ok(())
    }
    fn load(&self, _version: u32, bytes: &[u8], pos: &mut usize, object: &ObjectRef) -> CResult<()> {
        let (value, consumed) = oid::decode(&bytes[*pos..])?;
        *pos += consumed;
        object.borrow_mut().downcast_mut::<Counter>().unwrap().hits = value.0 as u32;
        Ok(())
    }
}

struct Task {
    title: String,
    done: bool,
}

#[derive(Default)]
struct TaskKind;

impl EntityKind for TaskKind {
    fn type_name(&self) -> &'static str {
        "Task"
    }
    fn client_type_version(&self) -> u32 {
        1
    }
    fn create(&self) -> ObjectRef {
        Rc::new(RefCell::new(Task { title: String::new(), done: false }))
    }
    fn save(&self, object: &ObjectRef, out: &mut Vec<u8>) -> CResult<()> {
        let task = object.borrow();
        let task = task.downcast_ref::<Task>().unwrap();
        let title_bytes = task.title.as_bytes();
        out.extend(oid::encode(Oid(title_bytes.len() as u64)));
        out.extend_from_slice(title_bytes);
        out.push(u8::from(task.done));
        Ok(())
    }
    fn load(&self, _version: u32, bytes: &[u8], pos: &mut usize, object: &ObjectRef) -> CResult<()> {
        let (len, consumed) = oid::decode(&bytes[*pos..])?;
        *pos += consumed;
        let len = len.0 as usize;
        let title = String::from_utf8_lossy(&bytes[*pos..*pos + len]).into_owned();
        *pos += len;
        let done = bytes[*pos] != 0;
        *pos += 1;
        let mut task = object.borrow_mut();
        let task = task.downcast_mut::<Task>().unwrap();
        task.title = title;
        task.done = done;
        Ok(())
    }
}

fn main() {
    println!("Hello, otm!");

    run().unwrap();

    println!("Bye~");
}

fn run() -> Result<(), Error> {
    let store = ObjectStore::new();

    // A singleton tracks how many tasks have ever been created.
    {
        let mut tx = store.begin_write();
        let counter = tx.singleton::<CounterKind>()?;
        counter.borrow_mut().downcast_mut::<Counter>().unwrap().hits += 2;
        tx.store(&counter)?;

        let first = tx.new_object::<TaskKind>()?;
        first.borrow_mut().downcast_mut::<Task>().unwrap().title = "write the spec".to_string();
        tx.store(&first)?;

        let second = tx.new_object::<TaskKind>()?;
        {
            let mut second_mut = second.borrow_mut();
            let second_mut = second_mut.downcast_mut::<Task>().unwrap();
            second_mut.title = "review the spec".to_string();
            second_mut.done = true;
        }
        tx.store(&second)?;

        tx.commit()?;
    }

    // A fresh reader observes the committed tasks and the singleton.
    {
        let mut tx = store.begin_read();
        let tasks = tx.enumerate(&[])?;
        for (oid, object, _table_id) in &tasks {
            if let Some(task) = object.borrow().downcast_ref::<Task>() {
                println!("task {:?}: {} (done={})", oid, task.title, task.done);
            }
        }

        let counter = tx.singleton::<CounterKind>()?;
        let hits = counter.borrow().downcast_ref::<Counter>().unwrap().hits;
        assert_eq!(hits, 2);
        println!("counter singleton reports {hits} tasks created");
    }

    // Delete the completed task and confirm it no longer enumerates.
    {
        let mut tx = store.begin_write();
        let done_task = tx
            .enumerate(&[])?
            .into_iter()
            .find(|(_, object, _)| object.borrow().downcast_ref::<Task>().map(|t| t.done).unwrap_or(false))
            .map(|(oid, _, _)| oid);
        if let Some(oid) = done_task {
            let object = tx.get(oid)?.expect("just enumerated");
            tx.delete(&object)?;
        }
        tx.commit()?;
    }

    {
        let mut tx = store.begin_read();
        // The counter singleton and the one remaining (undone) task.
        let remaining = tx.enumerate(&[])?;
        assert_eq!(remaining.len(), 2);
    }

    Ok(())
}
