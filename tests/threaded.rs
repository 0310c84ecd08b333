#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use std::{
        sync::{Arc, Barrier},
        thread,
        time::Duration,
    };

    use promise_core::{Error, Handlers, Runtime, ThreadScheduler, Value};

    fn runtime() -> Runtime {
        let scheduler = ThreadScheduler::builder()
            .name("promise-tests")
            .spawn()
            .expect("The scheduler worker failed to spawn");
        Runtime::new(scheduler)
    }

    #[test]
    fn test_resolve_from_another_thread() {
        let runtime = runtime();
        let deferred = runtime.pending();
        let promise = deferred.promise();

        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            deferred.resolve(Value::new(42));
        });

        let result = block_on(async { promise.await }).unwrap();
        assert_eq!(result.downcast_ref::<i32>(), Some(&42));
    }

    #[test]
    fn test_chain_settles_on_worker() {
        let runtime = runtime();
        let deferred = runtime.pending();
        let chained = deferred
            .promise()
            .then(Handlers::new().on_fulfilled(|v| {
                Ok(Value::new(format!("{}!", v.downcast_ref::<&str>().copied().unwrap_or_default())))
            }));

        let task1 = thread::spawn(move || block_on(chained.settled()));
        let task2 = thread::spawn(move || deferred.resolve(Value::new("🍓")));
        task2.join().expect("The task2 thread has panicked");
        let value = task1.join().expect("The task1 thread has panicked").unwrap();
        assert_eq!(value.downcast_ref::<String>().map(String::as_str), Some("🍓!"));
    }

    #[test]
    fn test_concurrent_resolvers_settle_once() {
        let runtime = runtime();
        let deferred = runtime.pending();
        let promise = deferred.promise();

        let racers: Vec<_> = (0..8)
            .map(|i| {
                let deferred = deferred.clone();
                thread::spawn(move || {
                    if i % 2 == 0 {
                        deferred.resolve(Value::new(i));
                    } else {
                        deferred.reject(Value::new(i));
                    }
                })
            })
            .collect();
        for racer in racers {
            racer.join().expect("A resolver thread has panicked");
        }

        let first = block_on(promise.settled());
        // Whichever call won, the outcome never changes afterwards.
        let again = block_on(promise.settled());
        match (first, again) {
            (Ok(a), Ok(b)) => assert!(a.ptr_eq(&b)),
            (Err(a), Err(b)) => assert!(a.ptr_eq(&b)),
            _ => panic!("The promise settled twice"),
        }
    }

    #[test]
    fn test_followee_settled_on_another_thread() {
        let runtime = runtime();
        let outer = runtime.pending();
        let inner = runtime.pending();
        outer.resolve(inner.promise());
        let promise = outer.promise();

        let producer = thread::spawn(move || {
            inner.progress(Value::new(1));
            inner.reject(Value::new("💥"));
            inner.resolve(Value::new("ignored"));
        });
        producer.join().expect("The producer thread has panicked");

        let reason = block_on(promise.settled()).unwrap_err();
        assert_eq!(reason.downcast_ref::<&str>(), Some(&"💥"));
    }

    #[test]
    fn test_racing_mutual_resolution_never_links_both_ways() {
        let runtime = runtime();
        for _ in 0..500 {
            let a = runtime.pending();
            let b = runtime.pending();
            let barrier = Arc::new(Barrier::new(2));

            let (left, right) = (a.clone(), b.promise());
            let wait = barrier.clone();
            let first = thread::spawn(move || {
                wait.wait();
                left.resolve(right);
            });
            let (left, right) = (b.clone(), a.promise());
            let wait = barrier.clone();
            let second = thread::spawn(move || {
                wait.wait();
                left.resolve(right);
            });
            first.join().expect("The first resolver has panicked");
            second.join().expect("The second resolver has panicked");

            assert!(!(a.promise().is_following() && b.promise().is_following()));
            // One side follows, the other rejects the loop, and both settle.
            for promise in [a.promise(), b.promise()] {
                let reason = block_on(promise.settled()).unwrap_err();
                assert!(matches!(reason.as_error(), Some(Error::CyclicResolution(_))));
            }
        }
    }
}
