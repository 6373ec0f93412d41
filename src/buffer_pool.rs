/// 缓冲区池模块
///
/// 为每个转发方向提供可复用的固定大小缓冲区，避免每个连接都重新分配内存
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::trace;

/// 默认缓冲区大小（16KB）
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// 池中最多保留的空闲缓冲区数量
pub const DEFAULT_MAX_IDLE: usize = 256;

/// 固定大小的字节缓冲区池
///
/// 取出的缓冲区由 [`PooledBuffer`] 独占持有，drop 时自动归还。
/// 归还时缓冲区长度会被恢复为 `buffer_size`，下一个使用者总是拿到完整的缓冲区。
#[derive(Debug)]
pub struct BufferPool {
    buffer_size: usize,
    max_idle: usize,
    idle: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    /// 创建指定缓冲区大小的池，`buffer_size` 为 0 时使用默认大小
    pub fn new(buffer_size: usize) -> Self {
        Self::with_max_idle(buffer_size, DEFAULT_MAX_IDLE)
    }

    /// 创建池并指定最多保留的空闲缓冲区数量
    pub fn with_max_idle(buffer_size: usize, max_idle: usize) -> Self {
        let buffer_size = if buffer_size == 0 {
            DEFAULT_BUFFER_SIZE
        } else {
            buffer_size
        };
        Self {
            buffer_size,
            max_idle,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// 每个缓冲区的大小
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// 当前空闲缓冲区数量
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// 取出一个缓冲区，池为空时新分配
    pub fn get(self: &Arc<Self>) -> PooledBuffer {
        let reused = self.idle.lock().pop();
        let buf = match reused {
            Some(buf) => buf,
            None => {
                trace!("Allocating new {} byte buffer", self.buffer_size);
                vec![0u8; self.buffer_size]
            }
        };
        PooledBuffer {
            buf,
            pool: Arc::clone(self),
        }
    }

    fn put(&self, mut buf: Vec<u8>) {
        // 使用者可能截断或扩展过缓冲区
        buf.resize(self.buffer_size, 0);
        if buf.capacity() > self.buffer_size * 2 {
            buf.shrink_to(self.buffer_size);
        }

        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

/// 从 [`BufferPool`] 取出的缓冲区，drop 时归还到池中
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.put(buf);
    }
}
