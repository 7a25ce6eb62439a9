//! Tasks and channels end-to-end: rendezvous, closed semantics, join and
//! detach, and async function sugar.

use hemlock::{CollectStringPrint, ExcKind, Exception, HostValue, Runner};

fn run(src: &str) -> (Result<HostValue, Exception>, String) {
    let runner = Runner::new(src.to_owned(), "conc.hml").unwrap();
    let print = CollectStringPrint::new();
    let result = runner.run_with(Box::new(print.clone()));
    (result, print.output())
}

fn output(src: &str) -> String {
    let (result, output) = run(src);
    result.unwrap();
    output
}

#[test]
fn rendezvous_channel_pairs_sender_with_receiver() {
    let src = "let c = channel(0); spawn(fn() { c.send(7); }); print(c.recv());";
    assert_eq!(output(src), "7\n");
}

#[test]
fn bounded_channel_buffers_up_to_capacity() {
    let src = r"
        let c = channel(2);
        c.send(1);
        c.send(2);
        print(c.recv(), c.recv());
    ";
    assert_eq!(output(src), "1 2\n");
}

#[test]
fn for_over_channel_drains_until_closed() {
    let src = r"
        let c = channel(4);
        let producer = spawn(fn() {
            for x in [1, 2, 3] {
                c.send(x);
            }
            c.close();
        });
        for x in c {
            print(x);
        }
        join(producer);
    ";
    assert_eq!(output(src), "1\n2\n3\n");
}

#[test]
fn send_on_closed_channel_fails() {
    let src = r"
        let c = channel(1);
        c.close();
        try { c.send(1); } catch (e) { print(e); }
    ";
    assert_eq!(output(src), "ClosedChannel: send on closed channel\n");
}

#[test]
fn recv_ok_discriminates_closed_from_null() {
    let src = r"
        let c = channel(1);
        c.send(null);
        c.close();
        let first = c.recv_ok();
        let second = c.recv_ok();
        print(first[1], second[1]);
    ";
    assert_eq!(output(src), "true false\n");
}

#[test]
fn join_returns_the_task_result() {
    let src = "let t = spawn(fn() { return 40 + 2; }); print(join(t));";
    assert_eq!(output(src), "42\n");
}

#[test]
fn join_rethrows_the_task_exception() {
    let src = r#"
        let t = spawn(fn() { throw "task blew up"; });
        try { join(t); } catch (e) { print(e); }
    "#;
    assert_eq!(output(src), "task blew up\n");
}

#[test]
fn double_join_fails() {
    let src = r"
        let t = spawn(fn() { return 1; });
        join(t);
        join(t);
    ";
    let (result, _) = run(src);
    assert_eq!(result.unwrap_err().kind(), ExcKind::TaskAlreadyJoined);
}

#[test]
fn joining_a_detached_task_fails() {
    let src = r"
        let t = spawn(fn() { return 1; });
        detach(t);
        join(t);
    ";
    let (result, _) = run(src);
    assert_eq!(result.unwrap_err().kind(), ExcKind::TaskAlreadyJoined);
}

#[test]
fn async_functions_spawn_and_await_joins() {
    let src = r"
        async fn work(n) {
            return n * 2;
        }
        let t = work(21);
        print(typeof(t), await t);
    ";
    assert_eq!(output(src), "task 42\n");
}

#[test]
fn tasks_communicate_through_shared_closures_via_channels() {
    let src = r"
        let c = channel(0);
        let t = spawn(fn() {
            let total = 0;
            for x in c {
                total += x;
            }
            return total;
        });
        c.send(1);
        c.send(2);
        c.send(3);
        c.close();
        print(join(t));
    ";
    assert_eq!(output(src), "6\n");
}

#[test]
fn spawn_passes_arguments() {
    let src = "let t = spawn(fn(a, b) { return a + b; }, 20, 22); print(join(t));";
    assert_eq!(output(src), "42\n");
}
