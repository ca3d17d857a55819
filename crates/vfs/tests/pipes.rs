//! 管道与轮询：背压、原子写、断管信号、终端回环

use uapi::fcntl::OpenFlags;
use uapi::poll::{PollDescriptor, PollEvents};
use uapi::signal::SIGNAL_PIPE;
use vfs::{KernelError, syscall};

#[test]
fn pipe_round_trip_and_backpressure() {
    let _guard = test_support::serial();

    let (read_end, write_end) = syscall::create_pipe(OpenFlags::NON_BLOCKING).unwrap();

    assert_eq!(
        syscall::read(read_end, &mut [0u8; 8]),
        Err(KernelError::TryAgain)
    );

    // 容量 8191：4096 + 4095 填满
    assert_eq!(syscall::write(write_end, &[7u8; 4096]).unwrap(), 4096);
    assert_eq!(syscall::write(write_end, &[7u8; 4095]).unwrap(), 4095);

    // 原子写：空间不足时一个字节也不进
    assert_eq!(
        syscall::write(write_end, &[7u8; 1]),
        Err(KernelError::TryAgain)
    );

    let mut buffer = vec![0u8; 4096];
    assert_eq!(syscall::read(read_end, &mut buffer).unwrap(), 4096);
    assert_eq!(syscall::write(write_end, &[9u8; 4096]).unwrap(), 4096);

    syscall::close(read_end).unwrap();
    syscall::close(write_end).unwrap();
}

#[test]
fn oversized_write_is_partial() {
    let _guard = test_support::serial();

    let (read_end, write_end) = syscall::create_pipe(OpenFlags::NON_BLOCKING).unwrap();

    // 超过原子上限的写按空间分段
    let big = vec![1u8; 10000];
    assert_eq!(syscall::write(write_end, &big).unwrap(), 8191);

    let mut drain = vec![0u8; 8191];
    assert_eq!(syscall::read(read_end, &mut drain).unwrap(), 8191);

    syscall::close(read_end).unwrap();
    syscall::close(write_end).unwrap();
}

#[test]
fn broken_pipe_raises_signal() {
    let _guard = test_support::serial();
    test_support::TEST_KERNEL.take_delivered_signals();

    let (read_end, write_end) = syscall::create_pipe(OpenFlags::NON_BLOCKING).unwrap();
    syscall::close(read_end).unwrap();

    assert_eq!(
        syscall::write(write_end, b"nobody listens"),
        Err(KernelError::BrokenPipe)
    );
    let delivered = test_support::TEST_KERNEL.take_delivered_signals();
    assert!(delivered.iter().any(|(_, signal)| *signal == SIGNAL_PIPE));

    syscall::close(write_end).unwrap();
}

#[test]
fn read_end_sees_end_of_file() {
    let _guard = test_support::serial();

    let (read_end, write_end) = syscall::create_pipe(OpenFlags::NON_BLOCKING).unwrap();
    syscall::write(write_end, b"tail").unwrap();
    syscall::close(write_end).unwrap();

    let mut buffer = [0u8; 8];
    assert_eq!(syscall::read(read_end, &mut buffer).unwrap(), 4);
    assert_eq!(
        syscall::read(read_end, &mut buffer),
        Err(KernelError::EndOfFile)
    );
    syscall::close(read_end).unwrap();
}

#[test]
fn poll_reports_pipe_state_and_bad_handles() {
    let _guard = test_support::serial();

    let (read_end, write_end) = syscall::create_pipe(OpenFlags::NON_BLOCKING).unwrap();

    let mut set = [
        PollDescriptor::new(read_end, PollEvents::IN),
        PollDescriptor::new(write_end, PollEvents::OUT),
        PollDescriptor::new(-1, PollEvents::IN),
    ];
    let ready = syscall::poll(&mut set, 0, None).unwrap();
    assert_eq!(ready, 2);
    assert!(set[0].returned_events.is_empty());
    assert!(set[1].returned_events.contains(PollEvents::OUT));
    assert!(set[2].returned_events.contains(PollEvents::INVALID_HANDLE));

    syscall::write(write_end, b"x").unwrap();
    let ready = syscall::poll(&mut set[..1], 0, None).unwrap();
    assert_eq!(ready, 1);
    assert!(set[0].returned_events.contains(PollEvents::IN));

    syscall::close(read_end).unwrap();
    syscall::close(write_end).unwrap();
}

#[test]
fn terminal_pair_crosses_streams() {
    let _guard = test_support::serial();

    let flags = OpenFlags::NON_BLOCKING;
    let (master, slave) = syscall::create_terminal(flags, flags).unwrap();

    // 主端写入从从端读出，反向亦然
    syscall::write(master, b"echo off").unwrap();
    let mut buffer = [0u8; 16];
    assert_eq!(syscall::read(slave, &mut buffer).unwrap(), 8);
    assert_eq!(&buffer[..8], b"echo off");

    syscall::write(slave, b"ready").unwrap();
    assert_eq!(syscall::read(master, &mut buffer).unwrap(), 5);
    assert_eq!(&buffer[..5], b"ready");

    syscall::close(master).unwrap();
    syscall::close(slave).unwrap();
}
