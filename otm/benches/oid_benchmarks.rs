//! Benchmarks for the OID codec and a small end-to-end commit/enumerate
//! workload, in the same `criterion` style the teacher's own bench suite
//! uses (benchmark groups, `BenchmarkId`, explicit throughput).

use std::cell::RefCell;
use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use otm::error::CResult;
use otm::object::{EntityKind, ObjectRef};
use otm::oid::{self, Oid};
use otm::txn::ObjectStore;

#[derive(Default)]
struct Item {
    value: u64,
}

#[derive(Default)]
struct ItemKind;

impl EntityKind for ItemKind {
    fn type_name(&self) -> &'static str {
        "Item"
    }
    fn client_type_version(&self) -> u32 {
        1
    }
    fn create(&self) -> ObjectRef {
        Rc::new(RefCell::new(Item::default()))
    }
    fn save(&self, object: &ObjectRef, out: &mut Vec<u8>) -> CResult<()> {
        let value = object.borrow().downcast_ref::<Item>().unwrap().value;
        out.extend(oid::encode(Oid(value)));
        Ok(())
    }
    fn load(&self, _version: u32, bytes: &[u8], pos: &mut usize, object: &ObjectRef) -> CResult<()> {
        let (value, consumed) = oid::decode(&bytes[*pos..])?;
        *pos += consumed;
        object.borrow_mut().downcast_mut::<Item>().unwrap().value = value.0;
        Ok(())
    }
}

/// One representative value per length class (1..=9 bytes), so the encode
/// benchmark exercises every branch of `length_class`.
fn boundary_values() -> Vec<u64> {
    vec![0, 1 << 6, 1 << 13, 1 << 20, 1 << 27, 1 << 34, 1 << 41, 1 << 48, u64::MAX]
}

fn bench_oid_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("oid_codec");

    for value in boundary_values() {
        let len = oid::encoded_len(Oid(value));
        group.throughput(Throughput::Bytes(len as u64));

        group.bench_with_input(BenchmarkId::new("encode", len), &value, |b, &value| {
            b.iter(|| oid::encode(black_box(Oid(value))));
        });

        let encoded = oid::encode(Oid(value));
        group.bench_with_input(BenchmarkId::new("decode", len), &encoded, |b, encoded| {
            b.iter(|| oid::decode(black_box(encoded)).unwrap());
        });
    }

    group.finish();
}

fn bench_commit_and_enumerate(c: &mut Criterion) {
    let mut group = c.benchmark_group("transaction");

    for count in [16usize, 256, 4096] {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("commit", count), &count, |b, &count| {
            b.iter(|| {
                let store = ObjectStore::new();
                let mut tx = store.begin_write();
                for i in 0..count {
                    let item = tx.new_object::<ItemKind>().unwrap();
                    item.borrow_mut().downcast_mut::<Item>().unwrap().value = i as u64;
                    tx.store(&item).unwrap();
                }
                tx.commit().unwrap();
            });
        });

        group.bench_with_input(BenchmarkId::new("enumerate", count), &count, |b, &count| {
            let store = ObjectStore::new();
            {
                let mut tx = store.begin_write();
                for i in 0..count {
                    let item = tx.new_object::<ItemKind>().unwrap();
                    item.borrow_mut().downcast_mut::<Item>().unwrap().value = i as u64;
                    tx.store(&item).unwrap();
                }
                tx.commit().unwrap();
            }
            b.iter(|| {
                let mut tx = store.begin_read();
                black_box(tx.enumerate(&[]).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_oid_codec, bench_commit_and_enumerate);
criterion_main!(benches);
